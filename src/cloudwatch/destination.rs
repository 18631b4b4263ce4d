use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::client::{ApiError, LogsApi};
use super::LogEvent;

/// One remote log stream and the sequence token needed to append to it.
/// Owned by a single flow driver; only one upload may be in flight.
pub struct Destination {
    group: String,
    stream: String,
    token: Option<String>,
    api: Arc<dyn LogsApi>,
}

impl Destination {
    pub fn new(group: String, stream: String, api: Arc<dyn LogsApi>) -> Self {
        Destination {
            group,
            stream,
            token: None,
            api,
        }
    }

    /// Fetch the stream's current sequence token. A stream that does not
    /// exist yet leaves the token unset.
    pub async fn refresh_token(&mut self) -> Result<(), ApiError> {
        let streams = self.api.describe_streams(&self.group, &self.stream).await?;
        self.token = streams
            .into_iter()
            .find(|info| info.name == self.stream)
            .and_then(|info| info.sequence_token);
        let state = if self.token.is_some() { "captured" } else { "absent" };
        debug!("{}: sequence token {}", self, state);
        Ok(())
    }

    /// Create the log group and stream. Either already existing counts as
    /// success.
    pub async fn create(&self) -> Result<(), ApiError> {
        match self.api.create_group(&self.group).await {
            Ok(()) | Err(ApiError::ResourceAlreadyExists) => {}
            Err(err) => return Err(err),
        }
        match self.api.create_stream(&self.group, &self.stream).await {
            Ok(()) | Err(ApiError::ResourceAlreadyExists) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    /// Upload one batch. The token rotates only on success; a failed call
    /// leaves it untouched for the caller's recovery path.
    pub async fn upload(&mut self, batch: &[LogEvent]) -> Result<(), ApiError> {
        let next = self
            .api
            .put_events(&self.group, &self.stream, self.token.as_deref(), batch)
            .await?;
        self.token = next;
        Ok(())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group: {} stream: {}", self.group, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cloudwatch::client::StreamInfo;

    #[derive(Default)]
    struct FakeApi {
        streams: Vec<StreamInfo>,
        put_results: Mutex<VecDeque<Result<Option<String>, ApiError>>>,
        group_result: Mutex<Option<ApiError>>,
        stream_result: Mutex<Option<ApiError>>,
        created: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LogsApi for FakeApi {
        async fn describe_streams(
            &self,
            _group: &str,
            prefix: &str,
        ) -> Result<Vec<StreamInfo>, ApiError> {
            Ok(self
                .streams
                .iter()
                .filter(|info| info.name.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn put_events(
            &self,
            _group: &str,
            _stream: &str,
            _token: Option<&str>,
            _events: &[LogEvent],
        ) -> Result<Option<String>, ApiError> {
            self.put_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn create_group(&self, group: &str) -> Result<(), ApiError> {
            self.created.lock().unwrap().push(format!("group/{group}"));
            match self.group_result.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn create_stream(&self, group: &str, stream: &str) -> Result<(), ApiError> {
            self.created
                .lock()
                .unwrap()
                .push(format!("stream/{group}/{stream}"));
            match self.stream_result.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn destination(api: FakeApi) -> Destination {
        Destination::new("group".into(), "stream".into(), Arc::new(api))
    }

    fn destination_with(api: Arc<FakeApi>) -> Destination {
        Destination::new("group".into(), "stream".into(), api)
    }

    #[tokio::test]
    async fn refresh_token_picks_exact_name_match() {
        let api = FakeApi {
            streams: vec![
                StreamInfo {
                    name: "stream-archive".into(),
                    sequence_token: Some("other".into()),
                },
                StreamInfo {
                    name: "stream".into(),
                    sequence_token: Some("current".into()),
                },
            ],
            ..FakeApi::default()
        };
        let mut dst = destination(api);
        dst.refresh_token().await.unwrap();
        assert_eq!(Some("current".to_string()), dst.token);
    }

    #[tokio::test]
    async fn refresh_token_without_match_leaves_token_unset() {
        let mut dst = destination(FakeApi::default());
        dst.token = Some("stale".into());
        dst.refresh_token().await.unwrap();
        assert_eq!(None, dst.token);
    }

    #[tokio::test]
    async fn upload_rotates_token_on_success() {
        let api = FakeApi::default();
        api.put_results
            .lock()
            .unwrap()
            .push_back(Ok(Some("next".into())));
        let mut dst = destination(api);
        dst.token = Some("current".into());
        dst.upload(&[]).await.unwrap();
        assert_eq!(Some("next".to_string()), dst.token);
    }

    #[tokio::test]
    async fn upload_failure_keeps_token() {
        let api = FakeApi::default();
        api.put_results
            .lock()
            .unwrap()
            .push_back(Err(ApiError::InvalidSequenceToken));
        let mut dst = destination(api);
        dst.token = Some("current".into());
        assert!(dst.upload(&[]).await.is_err());
        assert_eq!(Some("current".to_string()), dst.token);
    }

    #[tokio::test]
    async fn create_makes_group_then_stream() {
        let api = Arc::new(FakeApi::default());
        let dst = destination_with(api.clone());
        dst.create().await.unwrap();
        assert_eq!(
            vec!["group/group".to_string(), "stream/group/stream".to_string()],
            *api.created.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn create_treats_already_exists_as_success() {
        let api = FakeApi::default();
        *api.group_result.lock().unwrap() = Some(ApiError::ResourceAlreadyExists);
        *api.stream_result.lock().unwrap() = Some(ApiError::ResourceAlreadyExists);
        let dst = destination(api);
        assert!(dst.create().await.is_ok());
    }

    #[tokio::test]
    async fn create_propagates_other_errors() {
        let api = FakeApi::default();
        *api.group_result.lock().unwrap() = Some(ApiError::Transport("down".into()));
        let dst = destination(api);
        assert!(dst.create().await.is_err());
    }

    #[test]
    fn display() {
        let dst = destination(FakeApi::default());
        assert_eq!("group: group stream: stream", dst.to_string());
    }
}
