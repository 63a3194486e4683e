use crate::handler::Handler;
use crate::request::Request;
use crate::responder::Responder;
use crate::Error;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, Clone, Copy)]
pub struct Ping;

impl Handler for Ping {
    fn serve(&self, res: &mut Responder, req: &Request) -> Result<(), Error> {
        req.expect_args(0, 1)?;

        match req.arg(0) {
            Some(payload) => res.write_bulk(payload.clone()),
            None => res.write_simple("PONG"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_recoverable;
    use crate::frame::Frame;
    use bytes::Bytes;

    #[test]
    fn pong() {
        let mut res = Responder::new();
        Ping.serve(&mut res, &Request::new("ping", vec![])).unwrap();
        assert_eq!(res.to_frame(), Frame::Simple("PONG".to_string()));
    }

    #[test]
    fn payload_is_echoed() {
        let mut res = Responder::new();
        let req = Request::new("ping", vec![Bytes::from("hello")]);
        Ping.serve(&mut res, &req).unwrap();
        assert_eq!(res.to_frame(), Frame::Bulk(Bytes::from("hello")));
    }

    #[test]
    fn too_many_arguments() {
        let mut res = Responder::new();
        let req = Request::new("ping", vec![Bytes::from("a"), Bytes::from("b")]);
        let err = Ping.serve(&mut res, &req).unwrap_err();
        assert!(is_recoverable(&err));
    }
}
