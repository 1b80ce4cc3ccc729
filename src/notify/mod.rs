pub mod discord;

use anyhow::Result;

/// Handle for a delivered message, usable by callers that later edit or
/// delete what they posted.
#[derive(Debug, Clone)]
pub struct MessageHandle {
    pub destination: String,
    pub id: Option<String>,
}

/// Output side of the service. `post` resolves only once delivery has been
/// attempted, so a caller can chain a follow-up message with guaranteed
/// ordering. Delivery is at-most-once: a failure is the caller's to log,
/// never retried here.
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    async fn post(&self, destination: &str, text: &str) -> Result<MessageHandle>;
}

/// In-memory sink for tests and dry runs.
pub struct MemorySink {
    pub posts: std::sync::Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            posts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MessageSink for MemorySink {
    async fn post(&self, destination: &str, text: &str) -> Result<MessageHandle> {
        let mut posts = self.posts.lock().unwrap();
        posts.push((destination.to_string(), text.to_string()));
        Ok(MessageHandle {
            destination: destination.to_string(),
            id: Some(posts.len().to_string()),
        })
    }
}
