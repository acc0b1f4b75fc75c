//! The ordered collection of messages of one widget.

use crate::message::{Message, MessageId, MessagePatch};

/// The single source of truth for the messages of a conversation.
///
/// Every change is applied immediately, so a snapshot always reflects
/// all the calls made before it.
#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    destroyed: bool,
}

impl MessageStore {
    /// Adds a message at the end and returns its id.
    ///
    /// The message keeps its id unless it is unassigned or already taken,
    /// in which case a new one is generated. Returns `None` without
    /// adding anything if the store has been destroyed.
    pub fn append(&mut self, mut message: Message) -> Option<MessageId> {
        if self.destroyed {
            debug!("store is destroyed, discard the message");
            return None;
        }
        if message.id.is_unassigned() || self.position(message.id).is_some() {
            message.id = MessageId::new();
        }
        let id = message.id;
        self.messages.push(message);
        Some(id)
    }

    /// Inserts messages at `index`, shifting the later ones back. The
    /// index is clamped to the end. Returns the number of messages added.
    pub fn insert_all<I>(&mut self, index: usize, messages: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        if self.destroyed {
            debug!("store is destroyed, discard the messages");
            return 0;
        }
        let mut index = index.min(self.messages.len());
        let mut added = 0;
        for mut message in messages {
            if message.id.is_unassigned() || self.position(message.id).is_some()
            {
                message.id = MessageId::new();
            }
            self.messages.insert(index, message);
            index += 1;
            added += 1;
        }
        added
    }

    /// Merges `patch` into the message with the given id.
    ///
    /// Returns `false` if there is no such message, which happens when an
    /// update arrives after the message was removed.
    pub fn update(&mut self, id: MessageId, patch: MessagePatch) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id)
        else {
            warn!("message {id} not found, discard the update");
            return false;
        };
        patch.apply(message);
        true
    }

    /// Removes the message with the given id.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let idx = self.position(id)?;
        Some(self.messages.remove(idx))
    }

    /// Removes the message with the given id and every message after it.
    pub fn truncate_from(&mut self, id: MessageId) -> Vec<Message> {
        match self.position(id) {
            Some(idx) => self.messages.split_off(idx),
            None => Vec::new(),
        }
    }

    /// Returns a copy of all messages in conversation order.
    #[inline]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Returns all messages in conversation order.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the message with the given id.
    #[inline]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Returns the index of the message with the given id.
    #[inline]
    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops all messages. Later appends are ignored.
    pub fn destroy(&mut self) {
        self.messages.clear();
        self.destroyed = true;
    }

    /// Returns `true` once [`MessageStore::destroy`] was called.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use chatflow_embed_protocol::Enrichment;

    use super::*;
    use crate::message::{MessageState, Role};

    #[test]
    fn test_insert_all() {
        let mut store = MessageStore::default();
        store.append(Message::api_message("Welcome"));
        let question = store.append(Message::user("Q3", vec![])).unwrap();

        let added = store.insert_all(
            1,
            [Message::user("Q1", vec![]), Message::api_message("A1")],
        );
        assert_eq!(added, 2);
        let contents: Vec<_> =
            store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["Welcome", "Q1", "A1", "Q3"]);
        assert_eq!(store.position(question), Some(3));

        assert_eq!(store.insert_all(99, [Message::placeholder()]), 1);
        assert!(store.messages()[4].is_loading());

        store.destroy();
        assert_eq!(store.insert_all(0, [Message::placeholder()]), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_append_update_remove() {
        let mut store = MessageStore::default();
        let question = store.append(Message::user("Hi", vec![])).unwrap();
        let answer = store.append(Message::placeholder()).unwrap();
        assert_ne!(question, answer);
        assert!(store.get(answer).unwrap().is_loading());

        assert!(store.update(answer, MessagePatch::append("Hel")));
        assert!(store.update(
            answer,
            MessagePatch::append("lo").with_state(MessageState::Streaming)
        ));
        assert!(store.update(
            answer,
            MessagePatch::state(MessageState::Complete(Enrichment::default()))
        ));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[1].content, "Hello");
        assert!(!snapshot[1].is_loading());

        assert!(store.remove(question).is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id, answer);

        // Late updates to removed messages are ignored.
        assert!(!store.update(question, MessagePatch::content("late")));
        assert!(store.remove(question).is_none());
    }

    #[test]
    fn test_append_keeps_or_assigns_ids() {
        let mut store = MessageStore::default();
        let mut message = Message::api_message("Welcome");
        let id = MessageId::new();
        message.id = id;
        assert_eq!(store.append(message.clone()), Some(id));
        // A duplicate id gets replaced.
        let other = store.append(message).unwrap();
        assert_ne!(other, id);
    }

    #[test]
    fn test_truncate_from() {
        let mut store = MessageStore::default();
        store.append(Message::user("one", vec![])).unwrap();
        let second = store.append(Message::user("two", vec![])).unwrap();
        store.append(Message::user("three", vec![])).unwrap();
        let removed = store.truncate_from(second);
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.truncate_from(second).is_empty());
    }

    #[test]
    fn test_destroy() {
        let mut store = MessageStore::default();
        store.append(Message::user("Hi", vec![])).unwrap();
        store.destroy();
        assert!(store.is_empty());
        assert!(store.is_destroyed());
        assert_eq!(store.append(Message::user("Hi", vec![])), None);
        assert!(store.snapshot().is_empty());
    }
}
