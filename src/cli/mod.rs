mod embed;
mod extract;
mod init;
mod rank;
mod similar;

pub use embed::*;
pub use extract::*;
pub use init::*;
pub use rank::*;
pub use similar::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
