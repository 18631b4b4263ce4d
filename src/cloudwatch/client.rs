use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::operation::create_log_group::CreateLogGroupError;
use aws_sdk_cloudwatchlogs::operation::create_log_stream::CreateLogStreamError;
use aws_sdk_cloudwatchlogs::operation::describe_log_streams::DescribeLogStreamsError;
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use thiserror::Error;

use super::LogEvent;

/// Upload outcomes the flow driver tells apart. Everything that is not a
/// recognized service code collapses into `Api` or `Transport`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid sequence token")]
    InvalidSequenceToken,
    #[error("resource not found")]
    ResourceNotFound,
    #[error("resource already exists")]
    ResourceAlreadyExists,
    #[error("service error {code}: {message}")]
    Api { code: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// A remote log stream and its current sequence token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub sequence_token: Option<String>,
}

/// The semantic operations the agent needs from CloudWatch Logs.
#[async_trait]
pub trait LogsApi: Send + Sync {
    /// List streams in `group` whose names start with `prefix`.
    async fn describe_streams(&self, group: &str, prefix: &str)
        -> Result<Vec<StreamInfo>, ApiError>;

    /// Upload a batch, returning the next sequence token on success.
    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        events: &[LogEvent],
    ) -> Result<Option<String>, ApiError>;

    async fn create_group(&self, group: &str) -> Result<(), ApiError>;

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), ApiError>;
}

/// `LogsApi` over the AWS SDK. Credentials and region resolve from the
/// environment.
pub struct CloudWatchLogs {
    client: Client,
}

impl CloudWatchLogs {
    pub fn new(client: Client) -> Self {
        CloudWatchLogs { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        CloudWatchLogs::new(Client::new(&config))
    }
}

#[async_trait]
impl LogsApi for CloudWatchLogs {
    async fn describe_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<StreamInfo>, ApiError> {
        let mut pages = self
            .client
            .describe_log_streams()
            .log_group_name(group)
            .log_stream_name_prefix(prefix)
            .into_paginator()
            .send();

        let mut streams = Vec::new();
        while let Some(page) = pages
            .try_next()
            .await
            .map_err(|err| service_error(err, classify_describe))?
        {
            for stream in page.log_streams() {
                if let Some(name) = stream.log_stream_name() {
                    streams.push(StreamInfo {
                        name: name.to_string(),
                        sequence_token: stream.upload_sequence_token().map(str::to_owned),
                    });
                }
            }
        }
        Ok(streams)
    }

    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        events: &[LogEvent],
    ) -> Result<Option<String>, ApiError> {
        let events = events
            .iter()
            .map(|event| {
                InputLogEvent::builder()
                    .message(event.message.clone())
                    .timestamp(event.timestamp)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let output = self
            .client
            .put_log_events()
            .log_group_name(group)
            .log_stream_name(stream)
            .set_sequence_token(token.map(str::to_owned))
            .set_log_events(Some(events))
            .send()
            .await
            .map_err(|err| service_error(err, classify_put))?;

        Ok(output.next_sequence_token().map(str::to_owned))
    }

    async fn create_group(&self, group: &str) -> Result<(), ApiError> {
        self.client
            .create_log_group()
            .log_group_name(group)
            .send()
            .await
            .map_err(|err| service_error(err, classify_create_group))?;
        Ok(())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), ApiError> {
        self.client
            .create_log_stream()
            .log_group_name(group)
            .log_stream_name(stream)
            .send()
            .await
            .map_err(|err| service_error(err, classify_create_stream))?;
        Ok(())
    }
}

fn service_error<E>(err: SdkError<E>, classify: fn(&E) -> Option<ApiError>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(context) => {
            let err = context.into_err();
            classify(&err).unwrap_or_else(|| ApiError::Api {
                code: err.code().unwrap_or("Unknown").to_string(),
                message: err.message().unwrap_or_default().to_string(),
            })
        }
        other => ApiError::Transport(other.to_string()),
    }
}

fn classify_describe(err: &DescribeLogStreamsError) -> Option<ApiError> {
    match err {
        DescribeLogStreamsError::ResourceNotFoundException(_) => Some(ApiError::ResourceNotFound),
        _ => None,
    }
}

fn classify_put(err: &PutLogEventsError) -> Option<ApiError> {
    match err {
        PutLogEventsError::InvalidSequenceTokenException(_) => Some(ApiError::InvalidSequenceToken),
        PutLogEventsError::ResourceNotFoundException(_) => Some(ApiError::ResourceNotFound),
        _ => None,
    }
}

fn classify_create_group(err: &CreateLogGroupError) -> Option<ApiError> {
    match err {
        CreateLogGroupError::ResourceAlreadyExistsException(_) => {
            Some(ApiError::ResourceAlreadyExists)
        }
        _ => None,
    }
}

fn classify_create_stream(err: &CreateLogStreamError) -> Option<ApiError> {
    match err {
        CreateLogStreamError::ResourceAlreadyExistsException(_) => {
            Some(ApiError::ResourceAlreadyExists)
        }
        CreateLogStreamError::ResourceNotFoundException(_) => Some(ApiError::ResourceNotFound),
        _ => None,
    }
}
