//! Protocol version 11 statement exchanges.
//!
//! When the server accepted lazy send, statement allocation travels with the
//! prepare that follows it and cursor close travels with the next request.
//! Without lazy send every exchange behaves as in version 10.

use async_trait::async_trait;
use fb_protocol::consts::{free, INVALID_OBJECT};
use fb_protocol::{ProtocolVersion, Request};

use super::v10::{self, V10Statement};
use super::{PrepareError, PrepareRequest, Prepared, StatementExchange};
use crate::channel::Channel;
use crate::error::Result;

/// Statement lifecycle exchanges of version 11.
#[derive(Debug, Clone, Copy, Default)]
pub struct V11Statement;

impl V11Statement {
    /// Allocate and prepare in one round trip.
    ///
    /// The prepare refers to the statement through [`INVALID_OBJECT`], which
    /// the server resolves to the handle the allocation just created.
    async fn allocate_and_prepare(
        channel: &mut Channel,
        request: &PrepareRequest<'_>,
    ) -> std::result::Result<Prepared, PrepareError> {
        let allocate = Request::AllocateStatement {
            database: request.database,
        };
        let prepare = v10::prepare_request(INVALID_OBJECT, request);
        channel
            .send(&[("allocate statement", &allocate), ("prepare", &prepare)])
            .await?;

        let statement = match channel.receive_response("allocate statement").await {
            Ok(response) => response.object,
            Err(error) if error.is_fatal() => return Err(error.into()),
            Err(error) => {
                // the prepare fails as well without a handle; consume its response
                if let Err(prepare_error) = channel.receive_response("prepare").await {
                    if prepare_error.is_fatal() {
                        return Err(prepare_error.into());
                    }
                }
                return Err(error.into());
            }
        };
        tracing::debug!(statement, "statement allocated with prepare");

        let described = match channel.receive_response("prepare").await {
            Ok(response) => v10::describe(channel, statement, response.data).await,
            Err(error) => Err(error.with_handle(statement)),
        };
        match described {
            Ok(description) => Ok(Prepared {
                statement,
                description,
            }),
            Err(error) => Err(PrepareError {
                statement: Some(statement),
                error,
            }),
        }
    }
}

#[async_trait]
impl StatementExchange for V11Statement {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V11
    }

    async fn allocate(&self, channel: &mut Channel, database: i32) -> Result<i32> {
        V10Statement.allocate(channel, database).await
    }

    async fn prepare(
        &self,
        channel: &mut Channel,
        request: PrepareRequest<'_>,
    ) -> std::result::Result<Prepared, PrepareError> {
        match request.statement {
            None if channel.lazy_send() => Self::allocate_and_prepare(channel, &request).await,
            _ => V10Statement.prepare(channel, request).await,
        }
    }

    async fn free(&self, channel: &mut Channel, statement: i32, option: i32) -> Result<()> {
        if option == free::DSQL_CLOSE && channel.lazy_send() {
            return channel.defer(
                "close cursor",
                &Request::FreeStatement { statement, option },
            );
        }
        V10Statement.free(channel, statement, option).await
    }
}
