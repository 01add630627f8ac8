use std::sync::Arc;

use wirechan_encoding::Message;
use wirechan_transport::Via;

use crate::config::{Binding, ChannelShape};
use crate::error::{ChannelError, Result};
use crate::handle::OperationHandle;
use crate::pool::ConnectionPool;
use crate::request::RequestChannel;

/// Builds client channels for one binding, sharing an outbound
/// connection pool across all of them.
#[derive(Debug)]
pub struct ChannelFactory {
    binding: Binding,
    pool: Arc<ConnectionPool>,
}

impl ChannelFactory {
    pub fn new(binding: Binding) -> Self {
        let pool = Arc::new(ConnectionPool::new(binding.pool));
        Self { binding, pool }
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// The shared outbound pool, exposed for diagnostics.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Create a channel of the given shape to `via`. Only the
    /// [`Output`](ChannelShape::Output) and
    /// [`RequestReply`](ChannelShape::RequestReply) shapes are provided
    /// by this stack.
    pub fn create_channel(&self, shape: ChannelShape, via: &Via) -> Result<RequestChannel> {
        match shape {
            ChannelShape::Output | ChannelShape::RequestReply => Ok(RequestChannel::new(
                self.binding.clone(),
                via.clone(),
                self.pool.clone(),
                shape,
            )),
            ChannelShape::Input | ChannelShape::Duplex => Err(ChannelError::Unsupported(format!(
                "{shape:?} channels are not provided by this transport"
            ))),
        }
    }

    /// One-shot exchange on a worker thread: open, request, close.
    pub fn request_async(&self, via: &Via, message: Message) -> OperationHandle<Message> {
        let binding = self.binding.clone();
        let via = via.clone();
        let pool = self.pool.clone();
        OperationHandle::spawn("exchange", move || {
            let mut channel =
                RequestChannel::new(binding, via, pool, ChannelShape::RequestReply);
            channel.open()?;
            let reply = channel.request(message)?;
            channel.close()?;
            Ok(reply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_shapes_are_rejected() {
        let factory = ChannelFactory::new(Binding::default());
        let via = Via::tcp("127.0.0.1", 9);
        assert!(matches!(
            factory.create_channel(ChannelShape::Input, &via),
            Err(ChannelError::Unsupported(_))
        ));
        assert!(matches!(
            factory.create_channel(ChannelShape::Duplex, &via),
            Err(ChannelError::Unsupported(_))
        ));
    }

    #[test]
    fn created_channels_share_the_pool() {
        let factory = ChannelFactory::new(Binding::default());
        let via = Via::tcp("127.0.0.1", 9);
        let a = factory.create_channel(ChannelShape::RequestReply, &via).unwrap();
        let b = factory.create_channel(ChannelShape::Output, &via).unwrap();
        // Both start in Created and are independent objects.
        assert_eq!(a.state(), crate::lifecycle::CommunicationState::Created);
        assert_eq!(b.state(), crate::lifecycle::CommunicationState::Created);
    }
}
