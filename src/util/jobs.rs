//! Background work handed off to other services through Redis lists.

use fred::{clients::Pool as RedisPool, interfaces::ListInterface};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

/// Transcoders `BRPOP` from this list, so `LPUSH` keeps it first in, first out.
pub const TRANSCODE_QUEUE: &str = "jobs:transcode";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    pub job_id: String,
    pub track_id: i32,
    /// Object key of the original upload
    pub key: String,
    pub requested_by: i32,
    #[serde(with = "time::serde::iso8601")]
    pub enqueued_at: OffsetDateTime,
}

impl TranscodeJob {
    #[must_use]
    pub fn new(track_id: i32, key: &str, requested_by: i32) -> Self {
        let job_id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(char::from)
            .collect();

        Self {
            job_id,
            track_id,
            key: key.to_owned(),
            requested_by,
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }

    /// Pushes the job onto the transcode queue.
    ///
    /// # Returns
    /// The queue length after the push.
    ///
    /// # Errors
    /// Fails if the job can't be serialized or Redis can't be reached.
    pub async fn enqueue(&self, redis: &RedisPool) -> anyhow::Result<i64> {
        let payload = serde_json::to_string(self)?;
        let length: i64 = redis.lpush(TRANSCODE_QUEUE, payload).await?;
        info!(
            job_id = self.job_id,
            track_id = self.track_id,
            length,
            "Queued transcode job"
        );
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use fred::{
        mocks::{MockCommand, Mocks},
        prelude::*,
        types::config::Config as RedisConfig,
    };

    use super::*;

    /// Answers every `LPUSH` like a list that already held one job.
    #[derive(Debug, Default)]
    struct RecordedQueue {
        commands: Mutex<Vec<MockCommand>>,
    }

    impl Mocks for RecordedQueue {
        fn process_command(&self, command: MockCommand) -> Result<Value, Error> {
            let mut commands = self.commands.lock().unwrap();
            commands.push(command);
            Ok(Value::Integer(commands.len() as i64 + 1))
        }
    }

    async fn mocked_pool(mocks: Arc<RecordedQueue>) -> RedisPool {
        let config = RedisConfig {
            mocks: Some(mocks),
            ..Default::default()
        };
        let pool = Builder::from_config(config).build_pool(1).unwrap();
        pool.init().await.unwrap();
        pool
    }

    #[tokio::test]
    async fn enqueue_pushes_json_onto_the_transcode_queue() {
        let queue = Arc::new(RecordedQueue::default());
        let pool = mocked_pool(queue.clone()).await;
        let job = TranscodeJob::new(9, "uploads/3/xyz-demo.wav", 3);

        assert_eq!(job.enqueue(&pool).await.unwrap(), 2);

        let commands = queue.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(&*commands[0].cmd, "LPUSH");
        assert_eq!(commands[0].args.len(), 2);
        let payload = commands[0].args[1].as_str().unwrap();
        let pushed: TranscodeJob = serde_json::from_str(&payload).unwrap();
        assert_eq!(pushed, job);
    }

    #[test]
    fn serializes_camel_case() {
        let job = TranscodeJob::new(42, "uploads/7/abc-song.flac", 7);
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["trackId"], 42);
        assert_eq!(json["requestedBy"], 7);
        assert_eq!(json["key"], "uploads/7/abc-song.flac");
        assert_eq!(json["jobId"].as_str().unwrap().len(), 20);
        assert!(json["enqueuedAt"].is_string());
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(
            TranscodeJob::new(1, "k", 1).job_id,
            TranscodeJob::new(1, "k", 1).job_id
        );
    }
}
