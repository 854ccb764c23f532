use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upstream failure reported by a data source. `Clone` so a coalesced
/// fetch can hand the leader's error to every waiter.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    #[error("unable to resolve operation")]
    UnableToResolve,
    #[error("{0}")]
    Load(String),
}

/// A remote origin for fetched data. Implementations write the raw upstream
/// response bytes to `out` and are expected to respect `cancel` themselves;
/// the resolver never force-aborts an in-flight load.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(
        &self,
        cancel: &CancellationToken,
        input: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), DataSourceError>;
}

/// A long-lived origin pushing one frame per event. Dropping every sender
/// clone terminates the subscription.
#[async_trait]
pub trait SubscriptionDataSource: Send + Sync {
    async fn start(
        &self,
        cancel: CancellationToken,
        input: &[u8],
        next: mpsc::Sender<Bytes>,
    ) -> Result<(), DataSourceError>;
}

pub struct HookContext<'a> {
    pub current_path: &'a [u8],
}

pub trait BeforeFetchHook: Send + Sync {
    fn on_before_fetch(&self, ctx: HookContext<'_>, input: &[u8]);
}

pub trait AfterFetchHook: Send + Sync {
    fn on_data(&self, ctx: HookContext<'_>, output: &[u8], single_flight: bool);
    fn on_error(&self, ctx: HookContext<'_>, output: &[u8], single_flight: bool);
}

/// Writer for multi-frame responses; `flush` marks a frame boundary. Any
/// `io::Write` qualifies.
pub trait FlushWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

impl<W: io::Write> FlushWriter for W {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(self)
    }
}
