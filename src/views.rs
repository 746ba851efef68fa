//! Derived views over the loaded message list.

use crate::models::Message;

/// Activity of one DAO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaoActivity {
    /// DAO label.
    pub dao_name: String,
    /// Number of messages.
    pub count: usize,
    /// Newest message timestamp.
    pub last_active: u64,
}

/// Summary counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    /// Total messages.
    pub total: usize,
    /// Distinct DAO labels.
    pub daos: usize,
    /// File messages.
    pub files: usize,
}

/// Messages whose DAO name or sender contains `filter`, ignoring case.
pub fn filter_messages<'a>(messages: &'a [Message], filter: &str) -> Vec<&'a Message> {
    let needle = filter.to_lowercase();
    messages
        .iter()
        .filter(|m| {
            m.dao_name.to_lowercase().contains(&needle) || m.sender.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Per-DAO counts, in order of first appearance.
pub fn dao_activity(messages: &[Message]) -> Vec<DaoActivity> {
    let mut activity: Vec<DaoActivity> = Vec::new();
    for message in messages {
        match activity.iter_mut().find(|a| a.dao_name == message.dao_name) {
            Some(entry) => {
                entry.count += 1;
                entry.last_active = entry.last_active.max(message.timestamp);
            }
            None => activity.push(DaoActivity {
                dao_name: message.dao_name.clone(),
                count: 1,
                last_active: message.timestamp,
            }),
        }
    }
    activity
}

/// The `n` most active DAOs by message count. Ties keep first-appearance order.
pub fn top_daos(messages: &[Message], n: usize) -> Vec<DaoActivity> {
    let mut activity = dao_activity(messages);
    activity.sort_by(|a, b| b.count.cmp(&a.count));
    activity.truncate(n);
    activity
}

/// Total, distinct-DAO and file counters.
pub fn message_stats(messages: &[Message]) -> MessageStats {
    MessageStats {
        total: messages.len(),
        daos: dao_activity(messages).len(),
        files: messages.iter().filter(|m| m.is_file).count(),
    }
}
