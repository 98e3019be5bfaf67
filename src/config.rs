//! CLI arguments and the init-resource file that pre-creates queues, topics
//! and buckets at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::app::AppState;
use crate::auth::RequestContext;
use crate::sns::types::{CreateTopicRequest, SubscribeRequest};
use crate::sqs::types::CreateQueueRequest;

#[derive(Parser, Debug)]
#[command(
    name = "fauxqs",
    about = "In-memory SQS, SNS and S3 emulator on a single port"
)]
pub struct Args {
    /// Listen port; 0 picks an ephemeral port.
    #[arg(long, default_value = "4566")]
    pub port: u16,
    /// Host embedded in queue URLs and virtual-hosted S3 addresses; defaults
    /// to each request's own Host header.
    #[arg(long)]
    pub host: Option<String>,
    /// Region used for unsigned requests.
    #[arg(long, default_value = "us-east-1")]
    pub default_region: String,
    #[arg(long, default_value = "000000000000")]
    pub account_id: String,
    /// Log every request.
    #[arg(long)]
    pub logger: bool,
    /// JSON file of resources to create at startup.
    #[arg(long)]
    pub init: Option<PathBuf>,
    /// Record engine events in the spy ring buffer.
    #[arg(long)]
    pub message_spies: bool,
    #[arg(long, default_value = "256")]
    pub spy_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: Option<String>,
    pub port: u16,
    pub default_region: String,
    pub account_id: String,
    pub logger: bool,
    pub message_spies: bool,
    pub spy_buffer_size: usize,
}

impl Config {
    /// `bound_port` is the actual listener port, which differs from
    /// `args.port` when an ephemeral port was requested.
    pub fn from_args(args: &Args, bound_port: u16) -> Config {
        Config {
            host: args.host.clone(),
            port: bound_port,
            default_region: args.default_region.clone(),
            account_id: args.account_id.clone(),
            logger: args.logger,
            message_spies: args.message_spies,
            spy_buffer_size: args.spy_buffer_size.max(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read init file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid init file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("init resource {name}: {reason}")]
    Apply { name: String, reason: String },
}

/// Resources created before the listener starts accepting. Entries apply in
/// list order, so dead-letter targets belong before the queues that
/// reference them.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitSpec {
    #[serde(default)]
    pub queues: Vec<InitQueue>,
    #[serde(default)]
    pub topics: Vec<InitTopic>,
    #[serde(default)]
    pub buckets: Vec<InitBucket>,
}

#[derive(Debug, Deserialize)]
pub struct InitQueue {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct InitTopic {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
    #[serde(default)]
    pub subscriptions: Vec<InitSubscription>,
}

#[derive(Debug, Deserialize)]
pub struct InitSubscription {
    pub protocol: String,
    pub endpoint: String,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct InitBucket {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
}

pub fn load_init(path: &Path) -> Result<InitSpec, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn apply_init(spec: InitSpec, app: &AppState) -> Result<(), ConfigError> {
    let ctx_for = |region: &Option<String>| RequestContext {
        region: region
            .clone()
            .unwrap_or_else(|| app.config.default_region.clone()),
        authority: app
            .config
            .host
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", app.config.port)),
    };

    for queue in spec.queues {
        let ctx = ctx_for(&queue.region);
        app.sqs
            .create_queue(
                &ctx,
                CreateQueueRequest {
                    queue_name: queue.name.clone(),
                    attributes: queue.attributes,
                    tags: queue.tags,
                },
            )
            .await
            .map_err(|e| ConfigError::Apply {
                name: queue.name,
                reason: e.message().to_string(),
            })?;
    }

    for topic in spec.topics {
        let ctx = ctx_for(&topic.region);
        let created = app
            .sns
            .create_topic(
                &ctx,
                CreateTopicRequest {
                    name: topic.name.clone(),
                    attributes: topic.attributes,
                    tags: Vec::new(),
                },
            )
            .await
            .map_err(|e| ConfigError::Apply {
                name: topic.name.clone(),
                reason: e.message().to_string(),
            })?;

        for sub in topic.subscriptions {
            app.sns
                .subscribe(
                    &ctx,
                    SubscribeRequest {
                        topic_arn: created.topic_arn.clone(),
                        protocol: sub.protocol,
                        endpoint: Some(sub.endpoint),
                        attributes: sub.attributes,
                    },
                )
                .await
                .map_err(|e| ConfigError::Apply {
                    name: topic.name.clone(),
                    reason: e.message().to_string(),
                })?;
        }
    }

    for bucket in spec.buckets {
        let ctx = ctx_for(&bucket.region);
        app.s3
            .create_bucket(&ctx.region, &bucket.name)
            .await
            .map_err(|e| ConfigError::Apply {
                name: bucket.name,
                reason: e.message(),
            })?;
    }

    Ok(())
}
