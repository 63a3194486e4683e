use crate::handler::Handler;
use crate::request::Request;
use crate::responder::Responder;
use crate::Error;

/// Returns `message`.
///
/// Ref: <https://redis.io/docs/latest/commands/echo>
#[derive(Debug, Clone, Copy)]
pub struct Echo;

impl Handler for Echo {
    fn serve(&self, res: &mut Responder, req: &Request) -> Result<(), Error> {
        req.expect_args(1, 1)?;
        res.write_bulk(req.args()[0].clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::frame::Frame;
    use bytes::Bytes;

    #[test]
    fn echo_message() {
        let mut res = Responder::new();
        let req = Request::new("echo", vec![Bytes::from("Hello, World!")]);
        Echo.serve(&mut res, &req).unwrap();
        assert_eq!(res.to_frame(), Frame::Bulk(Bytes::from("Hello, World!")));
    }

    #[test]
    fn echo_requires_one_argument() {
        let mut res = Responder::new();
        let err = Echo.serve(&mut res, &Request::new("echo", vec![])).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>(),
            Some(&ClientError::WrongNumberOfArguments("echo".to_string()))
        );
    }
}
