use bytes::Bytes;

use crate::handler::Handler;
use crate::request::Request;
use crate::responder::Responder;
use crate::stats::ServerInfo;
use crate::Error;

/// Returns information and statistics about the server.
///
/// Ref: <https://redis.io/docs/latest/commands/info>
#[derive(Debug, Clone)]
pub struct Info {
    info: ServerInfo,
}

impl Info {
    pub fn new(info: ServerInfo) -> Self {
        Self { info }
    }
}

impl Handler for Info {
    fn serve(&self, res: &mut Responder, _req: &Request) -> Result<(), Error> {
        res.write_bulk(Bytes::from(self.info.to_string()));
        Ok(())
    }
}
