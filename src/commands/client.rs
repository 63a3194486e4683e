use bytes::Bytes;

use crate::error::ClientError;
use crate::handler::Handler;
use crate::request::Request;
use crate::responder::Responder;
use crate::stats::ServerInfo;
use crate::Error;

/// `CLIENT LIST` returns one line per connected client. `CLIENT ID` returns the id of the
/// calling connection.
///
/// Ref: <https://redis.io/docs/latest/commands/client-list>
#[derive(Debug, Clone)]
pub struct Client {
    info: ServerInfo,
}

impl Client {
    pub fn new(info: ServerInfo) -> Self {
        Self { info }
    }
}

impl Handler for Client {
    fn serve(&self, res: &mut Responder, req: &Request) -> Result<(), Error> {
        let subcommand = req.arg_str(0)?.to_lowercase();

        match &subcommand[..] {
            "list" => {
                let mut list = String::new();
                for client in self.info.clients() {
                    list.push_str(&client.to_string());
                    list.push('\n');
                }
                res.write_bulk(Bytes::from(list));
            }
            "id" => match req.session() {
                Some(session) => res.write_bulk(Bytes::from(session.id().to_string())),
                None => res.write_nil(),
            },
            _ => {
                return Err(ClientError::custom(format!(
                    "ERR unknown subcommand '{}'. Try CLIENT LIST",
                    subcommand
                ))
                .into())
            }
        }

        Ok(())
    }
}
