/// Common key-construction helpers used by the Redis store.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    pub fn document(&self, collection: &str, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, collection, id)
    }

    /// Set holding every document id of a collection; queries scan it.
    pub fn collection_ids(&self, collection: &str) -> String {
        format!("{}:{}:_ids", self.prefix, collection)
    }

    /// Pub/sub channel carrying change events for every collection under this prefix.
    pub fn changes_channel(&self) -> String {
        format!("{}:_changes", self.prefix)
    }

    /// Stream every applied change is appended to; triggers consume it through consumer groups.
    pub fn change_log(&self) -> String {
        format!("{}:_change_log", self.prefix)
    }
}

/// Id of the Like document for a (content, user) pair.
pub fn like_id(content_id: &str, user_id: &str) -> String {
    format!("{content_id}_{user_id}")
}

/// Id of the ChapterProgress document for a (user, chapter) pair.
pub fn progress_id(user_id: &str, chapter_id: &str) -> String {
    format!("{user_id}_{chapter_id}")
}

/// Id of the Follow document for a (follower, followee) pair.
pub fn follow_id(follower_id: &str, followee_id: &str) -> String {
    format!("{follower_id}_{followee_id}")
}

/// Id of the receipt a trigger writes for an event it has applied.
pub fn receipt_id(trigger: &str, event_id: &str) -> String {
    format!("{trigger}:{event_id}")
}
