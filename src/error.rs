use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Broker connection failed: {0}")]
    ConnectionError(String),

    #[error("MQTT client error: {0}")]
    ClientError(#[from] rumqttc::ClientError),

    #[error("Invalid broker URL")]
    UrlParseError(#[from] url::ParseError),

    #[error("Storage collaborator failed: {0}")]
    StorageError(String),
}
