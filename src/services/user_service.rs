//! UserService gRPC implementation.
//!
//! CRUD calls go straight to the store. `RetrieveUserData` and
//! `GetAllUserData` scatter to sibling services and merge their replies;
//! `DeleteUser` notifies them after the store delete.

use std::sync::Arc;

use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{error, info, warn};

use super::ServiceContext;
use crate::config::AggregationPlan;
use crate::proto::{
    user_service_server::UserService as UserServiceTrait, CreateUserReq, CreateUserRes,
    DeleteUserReq, DeleteUserRes, GetAllUserDataReq, GetAllUserDataRes, ListUsersReq,
    ListUsersRes, OtherServiceUserData, ReadUserReq, ReadUserRes, RetrieveUserDataReq,
    RetrieveUserDataRes, UpdateUserReq, UpdateUserRes, User,
};
use crate::scatter::{Action, AggregateResult, ScatterError};
use crate::storage::{validate_id, UserRecord};

impl From<User> for UserRecord {
    fn from(user: User) -> Self {
        Self {
            id: Some(user.id).filter(|id| !id.is_empty()),
            email: user.email,
            phone: user.phone,
            date_of_birth: user.date_of_birth,
            first_name: user.first_name,
            last_name: user.last_name,
            credit_card_number: user.credit_card_number,
            expiration_date: user.expiration_date,
            cvc: user.cvc,
        }
    }
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id.unwrap_or_default(),
            email: record.email,
            phone: record.phone,
            date_of_birth: record.date_of_birth,
            first_name: record.first_name,
            last_name: record.last_name,
            credit_card_number: record.credit_card_number,
            expiration_date: record.expiration_date,
            cvc: record.cvc,
        }
    }
}

/// UserService gRPC server.
pub struct UserService {
    ctx: Arc<ServiceContext>,
}

impl UserService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Scatter `action` per `plan`, wait for the replies, merge.
    async fn gather(
        &self,
        subject_id: &str,
        action: Action,
        plan: &AggregationPlan,
    ) -> Result<AggregateResult, ScatterError> {
        if plan.include_local_record {
            validate_id(subject_id)?;
        }

        let (pending, report) = self
            .ctx
            .dispatcher
            .dispatch(subject_id, action, &plan.targets, plan.timeout())
            .await?;
        if !report.is_clean() {
            warn!(
                user_id = %subject_id,
                action = %action,
                failed = report.failures.len(),
                "Some siblings were not asked; result will be partial"
            );
        }

        let settled = pending.wait().await;

        let local = if plan.include_local_record {
            self.ctx.store.find_one(subject_id).await?
        } else {
            None
        };

        AggregateResult::build(subject_id, settled, local.as_ref())
    }
}

#[tonic::async_trait]
impl UserServiceTrait for UserService {
    type ListUsersStream = ReceiverStream<Result<ListUsersRes, Status>>;

    async fn create_user(
        &self,
        request: Request<CreateUserReq>,
    ) -> Result<Response<CreateUserRes>, Status> {
        let user = request
            .into_inner()
            .user
            .ok_or_else(|| Status::invalid_argument("CreateUserReq must have a user"))?;

        let mut record = UserRecord::from(user);
        record.id = None;
        let id = self.ctx.store.insert_one(record.clone()).await.map_err(|e| {
            error!(error = %e, "CreateUser insert failed");
            Status::from(e)
        })?;

        info!(user_id = %id, "User created");
        Ok(Response::new(CreateUserRes {
            user: Some(record.with_id(id).into()),
        }))
    }

    async fn read_user(
        &self,
        request: Request<ReadUserReq>,
    ) -> Result<Response<ReadUserRes>, Status> {
        let id = request.into_inner().id;
        let record = self
            .ctx
            .store
            .find_one(&id)
            .await?
            .ok_or_else(|| Status::not_found(format!("Could not find user with id {id}")))?;

        Ok(Response::new(ReadUserRes {
            user: Some(record.into()),
        }))
    }

    async fn update_user(
        &self,
        request: Request<UpdateUserReq>,
    ) -> Result<Response<UpdateUserRes>, Status> {
        let user = request
            .into_inner()
            .user
            .ok_or_else(|| Status::invalid_argument("UpdateUserReq must have a user"))?;
        let id = user.id.clone();

        let updated = self
            .ctx
            .store
            .find_one_and_update(&id, user.into())
            .await?
            .ok_or_else(|| Status::not_found(format!("Could not find user with id {id}")))?;

        info!(user_id = %id, "User updated");
        Ok(Response::new(UpdateUserRes {
            user: Some(updated.into()),
        }))
    }

    async fn delete_user(
        &self,
        request: Request<DeleteUserReq>,
    ) -> Result<Response<DeleteUserRes>, Status> {
        let id = request.into_inner().id;

        let deleted = self.ctx.store.delete_one(&id).await?;
        if deleted == 0 {
            return Err(Status::not_found(format!("Could not find user with id {id}")));
        }
        info!(user_id = %id, "User deleted");

        // The delete already happened; the cascade runs detached and its
        // failures only get logged.
        let dispatcher = self.ctx.dispatcher.clone();
        let targets = self.ctx.cascade.targets.clone();
        tokio::spawn(async move {
            match dispatcher
                .broadcast(&id, Action::DeleteAllRecords, &targets)
                .await
            {
                Ok(report) if !report.is_clean() => warn!(
                    user_id = %id,
                    notified = report.succeeded(),
                    failed = report.failures.len(),
                    "Cascade notification incomplete"
                ),
                Ok(_) => {}
                Err(e) => error!(user_id = %id, error = %e, "Cascade notification not sent"),
            }
        });

        Ok(Response::new(DeleteUserRes { success: true }))
    }

    async fn list_users(
        &self,
        _request: Request<ListUsersReq>,
    ) -> Result<Response<Self::ListUsersStream>, Status> {
        let mut users = self.ctx.store.find_all().await?;
        let (tx, rx) = tokio::sync::mpsc::channel(32);

        tokio::spawn(async move {
            while let Some(item) = users.next().await {
                let message = match item {
                    Ok(record) => Ok(ListUsersRes {
                        user: Some(record.into()),
                    }),
                    Err(e) => {
                        error!(error = %e, "ListUsers cursor failed");
                        let _ = tx
                            .send(Err(Status::unavailable(format!("Could not decode data: {e}"))))
                            .await;
                        break;
                    }
                };
                if tx.send(message).await.is_err() {
                    break; // Client disconnected
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn retrieve_user_data(
        &self,
        request: Request<RetrieveUserDataReq>,
    ) -> Result<Response<RetrieveUserDataRes>, Status> {
        let user_id = request.into_inner().user_id;
        if user_id.is_empty() {
            return Err(Status::invalid_argument("user_id is required"));
        }
        info!(user_id = %user_id, "RetrieveUserData");

        let plan = &self.ctx.aggregation.retrieve_user_data;
        let result = self
            .gather(&user_id, Action::RetrieveUserData, plan)
            .await?;

        Ok(Response::new(RetrieveUserDataRes {
            user_data: result
                .parts
                .iter()
                .map(|part| OtherServiceUserData {
                    service: part.source.clone(),
                    data: part.text(),
                })
                .collect(),
            partial: result.is_partial(),
            missing_services: result.missing,
        }))
    }

    async fn get_all_user_data(
        &self,
        request: Request<GetAllUserDataReq>,
    ) -> Result<Response<GetAllUserDataRes>, Status> {
        let id = request.into_inner().id;
        if id.is_empty() {
            return Err(Status::invalid_argument("id is required"));
        }
        info!(user_id = %id, "GetAllUserData");

        let plan = &self.ctx.aggregation.get_all_user_data;
        let result = self.gather(&id, Action::GetAllRecords, plan).await?;

        Ok(Response::new(GetAllUserDataRes {
            data: result.joined(),
            partial: result.is_partial(),
            missing_services: result.missing,
        }))
    }
}
