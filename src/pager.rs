//! Turning page-token listings into streams.

use crate::Result;
use async_stream::try_stream;
use futures::stream::BoxStream;
use std::future::Future;

/// Stream every item of a paginated listing.
///
/// `fetch` receives the page token to request (empty for the first page) and returns the page's
/// items together with the next token. An empty next token ends the stream.
pub(crate) fn paginate<T, F, Fut>(mut fetch: F) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnMut(String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(Vec<T>, String)>> + Send,
{
    Box::pin(try_stream! {
        let mut token = String::new();
        loop {
            let (items, next) = fetch(token).await?;
            for item in items {
                yield item;
            }
            if next.is_empty() {
                break;
            }
            token = next;
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::TryStreamExt as _;

    #[tokio::test]
    async fn test_paginate_follows_tokens() -> Result<(), Box<dyn std::error::Error>> {
        let items: Vec<u32> = paginate(|token: String| async move {
            Ok(match token.as_str() {
                "" => (vec![1, 2], "a".to_owned()),
                "a" => (vec![], "b".to_owned()),
                "b" => (vec![3], String::new()),
                _ => unreachable!(),
            })
        })
        .try_collect()
        .await?;
        assert_eq!(items, [1, 2, 3]);
        Ok(())
    }
}
