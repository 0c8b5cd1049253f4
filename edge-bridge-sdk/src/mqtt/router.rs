use crate::{cloud::BoxFuture, CloudResult};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result type for message handlers
pub type HandlerResult = CloudResult<()>;

/// Message handler callback type
pub type MessageHandler = Arc<dyn Fn(&str, Bytes) -> BoxFuture<HandlerResult> + Send + Sync>;

/// Compiled MQTT topic filter supporting `+` and a trailing `#`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<Level>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    Single,
    Multi,
}

/// Errors that can occur during filter compilation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicFilterError {
    #[error("Topic filter cannot be empty")]
    Empty,
    #[error("Multi-level wildcard (#) must be the last level of '{0}'")]
    MultiLevelNotLast(String),
    #[error("Wildcards (+, #) cannot be mixed with literal text in '{0}'")]
    MixedWildcard(String),
}

impl TopicFilter {
    pub fn new(filter: &str) -> Result<Self, TopicFilterError> {
        if filter.is_empty() {
            return Err(TopicFilterError::Empty);
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());
        for (index, part) in parts.into_iter().enumerate() {
            let level = match part {
                "+" => Level::Single,
                "#" if index == last => Level::Multi,
                "#" => return Err(TopicFilterError::MultiLevelNotLast(filter.to_string())),
                literal if literal.contains(['+', '#']) => {
                    return Err(TopicFilterError::MixedWildcard(filter.to_string()))
                }
                literal => Level::Literal(literal.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            raw: filter.to_string(),
            levels,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check whether `topic` matches this filter.
    ///
    /// `a/#` also matches the parent level `a`.
    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split('/');
        for level in &self.levels {
            match level {
                Level::Multi => return true,
                Level::Single => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Literal(literal) => match topic_levels.next() {
                    Some(part) if part == literal => {}
                    _ => return false,
                },
            }
        }
        topic_levels.next().is_none()
    }
}

/// Dispatches incoming publishes to the first handler whose filter matches.
///
/// Filters are checked in registration order.
pub struct MessageRouter {
    routes: RwLock<Vec<(TopicFilter, MessageHandler)>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for a topic filter
    pub async fn register(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> Result<(), TopicFilterError> {
        let filter = TopicFilter::new(filter)?;
        self.routes.write().await.push((filter, handler));
        Ok(())
    }

    /// Route a message to the matching handler.
    ///
    /// Unmatched topics are logged and ignored.
    pub async fn route_message(&self, topic: &str, payload: Bytes) -> HandlerResult {
        let handler = {
            let routes = self.routes.read().await;
            routes
                .iter()
                .find(|(filter, _)| filter.matches(topic))
                .map(|(_, handler)| Arc::clone(handler))
        };

        match handler {
            Some(handler) => handler(topic, payload).await,
            None => {
                tracing::warn!("No handler found for topic: {topic}");
                Ok(())
            }
        }
    }

    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
