//! Protocol version 12 database exchanges.

use async_trait::async_trait;
use bytes::Bytes;
use fb_codec::CancelHandle;
use fb_protocol::consts::cancel;
use fb_protocol::ProtocolVersion;

use super::v10::V10Database;
use super::DatabaseExchange;
use crate::channel::{BoxedTransport, Channel};
use crate::error::{Error, Result};

/// Database exchanges of version 12, which adds `op_cancel`.
#[derive(Debug, Clone, Copy, Default)]
pub struct V12Database;

#[async_trait]
impl DatabaseExchange for V12Database {
    fn origin(&self) -> ProtocolVersion {
        ProtocolVersion::V12
    }

    async fn attach(&self, channel: &mut Channel, database: &str, dpb: Bytes) -> Result<i32> {
        V10Database.attach(channel, database, dpb).await
    }

    async fn info(
        &self,
        channel: &mut Channel,
        database: i32,
        items: Bytes,
        buffer_length: i32,
    ) -> Result<Bytes> {
        V10Database
            .info(channel, database, items, buffer_length)
            .await
    }

    async fn detach(&self, channel: &mut Channel, database: i32) -> Result<()> {
        V10Database.detach(channel, database).await
    }

    async fn cancel(&self, canceller: &CancelHandle<BoxedTransport>, kind: i32) -> Result<()> {
        if !matches!(
            kind,
            cancel::DISABLE | cancel::ENABLE | cancel::RAISE | cancel::ABORT
        ) {
            return Err(Error::Encoding(format!("unknown cancel kind {kind}")));
        }
        tracing::info!(kind, "sending cancel");
        canceller
            .cancel(kind)
            .await
            .map_err(|e| Error::transport("cancel", e))
    }
}
