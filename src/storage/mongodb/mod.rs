//! MongoDB implementation of the user store.

mod user_store;

pub use user_store::MongoUserStore;

/// Field names as laid out in the users collection.
pub(crate) mod fields {
    pub const ID: &str = "_id";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const DATE_OF_BIRTH: &str = "dateofbirth";
    pub const FIRST_NAME: &str = "firstname";
    pub const LAST_NAME: &str = "lastname";
    pub const CREDIT_CARD_NUMBER: &str = "creditcardnumber";
    pub const EXPIRATION_DATE: &str = "expirationdate";
    pub const CVC: &str = "cvc";
}
