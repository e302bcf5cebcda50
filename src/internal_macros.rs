/// Send an idempotent unary call through the retry loop.
///
/// The receiver must have a cloneable `client`, a `config` carrying retry settings and a
/// `request` method that wraps a message in a `tonic::Request`. The message expression is evaluated
/// once per attempt, so it should clone whatever it borrows.
macro_rules! idempotent {
    ($self:ident . $rpc:ident($message:expr)) => {
        $crate::retry::invoke(&$self.config.retry, || {
            let mut client = $self.client.clone();
            let request = $self.request($message);
            async move { client.$rpc(request).await.map(tonic::Response::into_inner) }
        })
    };
}

pub(crate) use idempotent;
