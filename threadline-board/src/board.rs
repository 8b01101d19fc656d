//! The board service: `submit` and `fetch` over a [`Store`].
//!
//! ```text
//! submit ──► exclusive() ──► load ──► apply_submission ──► save ──► Message
//!                                          │
//!                                          └─ Err: nothing written
//! fetch  ──► load ──► Document
//! ```

use threadline_core::{
    apply_submission, BoardConfig, Document, Message, MessageId, MutationError, SubmitOutcome,
    Submission,
};

use crate::storage::{unix_now, Store, StoreError};

/// Errors surfaced by [`MessageBoard`].
#[derive(Debug, Clone)]
pub enum BoardError {
    /// Body exceeds the word limit; nothing was written
    Validation { words: usize, limit: usize },
    /// Parent could not be resolved and the board rejects orphans
    ParentNotFound(MessageId),
    /// The board already holds the largest representable id
    IdsExhausted,
    /// The backing store failed; the operation did not complete
    Store(StoreError),
}

impl BoardError {
    /// Whether the request itself was at fault, as opposed to the store.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BoardError::Validation { .. } | BoardError::ParentNotFound(_))
    }
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::Validation { limit, .. } => write!(f, "Message exceeds {limit} words"),
            BoardError::ParentNotFound(id) => write!(f, "Parent message {id} not found"),
            BoardError::IdsExhausted => write!(f, "Message id space exhausted"),
            BoardError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BoardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoardError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BoardError {
    fn from(e: StoreError) -> Self {
        BoardError::Store(e)
    }
}

impl From<MutationError> for BoardError {
    fn from(e: MutationError) -> Self {
        match e {
            MutationError::BodyTooLong { words, limit } => BoardError::Validation { words, limit },
            MutationError::ParentNotFound(id) => BoardError::ParentNotFound(id),
            MutationError::IdsExhausted => BoardError::IdsExhausted,
        }
    }
}

/// A message board bound to one store.
///
/// Submits serialize on the store's exclusive section; fetches read the
/// last fully written document without waiting.
pub struct MessageBoard<S: Store> {
    store: S,
    config: BoardConfig,
}

impl<S: Store> MessageBoard<S> {
    pub fn new(store: S, config: BoardConfig) -> Self {
        Self { store, config }
    }

    /// Board with the default limits (1000 messages, 50 words).
    pub fn with_defaults(store: S) -> Self {
        Self::new(store, BoardConfig::default())
    }

    /// Accept a message and return it as constructed.
    ///
    /// A reply whose parent cannot be found is still returned with its id
    /// unless the board is configured to reject orphans.
    pub fn submit(
        &self,
        author: impl Into<String>,
        body: impl Into<String>,
        parent_id: Option<MessageId>,
    ) -> Result<Message, BoardError> {
        let submission = Submission {
            author: author.into(),
            body: body.into(),
            parent_id,
        };
        Ok(self.submit_detailed(submission)?.message)
    }

    /// Like [`submit`](Self::submit) but reports where the message landed
    /// and how many messages retention evicted.
    pub fn submit_detailed(&self, submission: Submission) -> Result<SubmitOutcome, BoardError> {
        let _guard = self.store.exclusive()?;

        let mut document = self.store.load()?;
        let outcome = match apply_submission(&mut document, submission, unix_now(), &self.config) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::debug!("Submission rejected: {e}");
                return Err(e.into());
            }
        };
        self.store.save(&document)?;

        log::info!(
            "Accepted message {} from {} ({:?}) into {} store",
            outcome.message.id,
            outcome.message.author,
            outcome.attachment,
            self.store.kind()
        );
        Ok(outcome)
    }

    /// Snapshot of the whole board.
    pub fn fetch(&self) -> Result<Document, BoardError> {
        Ok(self.store.load()?)
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use threadline_core::{Attachment, OrphanPolicy};

    fn board() -> MessageBoard<MemoryStore> {
        MessageBoard::with_defaults(MemoryStore::new())
    }

    #[test]
    fn test_first_message_gets_id_zero() {
        let board = board();
        let msg = board.submit("ada", "hello board", None).unwrap();
        assert_eq!(msg.id, 0);
        assert_eq!(msg.author, "ada");
        assert!(msg.replies.is_empty());
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn test_fetch_reflects_submit() {
        let board = board();
        let first = board.submit("ada", "one", None).unwrap();
        let reply = board.submit("bob", "two", Some(first.id)).unwrap();

        let doc = board.fetch().unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.messages()[0].replies, vec![reply]);
    }

    #[test]
    fn test_too_long_body_is_not_written() {
        let board = board();
        board.submit("ada", "short", None).unwrap();
        let before = board.fetch().unwrap();

        let body = vec!["w"; 51].join(" ");
        let err = board.submit("bob", body, None).unwrap_err();
        assert!(matches!(err, BoardError::Validation { words: 51, limit: 50 }));
        assert_eq!(err.to_string(), "Message exceeds 50 words");
        assert!(err.is_rejection());

        assert_eq!(board.fetch().unwrap(), before);
        // The rejected body consumed no id
        assert_eq!(board.submit("bob", "ok", None).unwrap().id, 1);
    }

    #[test]
    fn test_orphan_dropped_by_default() {
        let board = board();
        board.submit("ada", "root", None).unwrap();

        let outcome = board.submit_detailed(Submission::reply("bob", "lost", 99)).unwrap();
        assert_eq!(outcome.attachment, Attachment::Dropped { parent_id: 99 });
        assert_eq!(outcome.message.id, 1);
        assert_eq!(board.fetch().unwrap().total_messages(), 1);
    }

    #[test]
    fn test_orphan_rejected_when_configured() {
        let config = BoardConfig {
            orphan_policy: OrphanPolicy::Reject,
            ..BoardConfig::default()
        };
        let board = MessageBoard::new(MemoryStore::new(), config);
        let err = board.submit("bob", "lost", Some(7)).unwrap_err();
        assert!(matches!(err, BoardError::ParentNotFound(7)));
        assert!(err.is_rejection());
        assert!(board.fetch().unwrap().is_empty());
    }

    #[test]
    fn test_negative_parent_dropped_by_default() {
        let board = board();
        board.submit("ada", "root", None).unwrap();

        let msg = board.submit("bob", "nowhere", Some(-1)).unwrap();
        assert_eq!(msg.id, 1);
        assert_eq!(msg.parent_id, Some(-1));
        assert_eq!(board.fetch().unwrap().total_messages(), 1);
    }

    #[test]
    fn test_exhausted_ids_fail_without_write() {
        let store = MemoryStore::new();
        let last = Message::new(MessageId::MAX, 1, "ada", "last", None);
        store.save(&Document::from(vec![last])).unwrap();
        let board = MessageBoard::with_defaults(store);
        let before = board.fetch().unwrap();

        let err = board.submit("bob", "one more", None).unwrap_err();
        assert!(matches!(err, BoardError::IdsExhausted));
        assert!(!err.is_rejection());
        assert_eq!(board.fetch().unwrap(), before);
    }

    #[test]
    fn test_retention_applies_on_submit() {
        let board = MessageBoard::new(MemoryStore::new(), BoardConfig::for_testing(3));
        for i in 0..5 {
            board.submit("ada", format!("post {i}"), None).unwrap();
        }
        let ids: Vec<MessageId> = board.fetch().unwrap().messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_store_error_is_not_rejection() {
        let err = BoardError::from(StoreError::CorruptionError("bad".into()));
        assert!(!err.is_rejection());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_boxed_store_board() {
        let board: MessageBoard<Box<dyn Store>> =
            MessageBoard::with_defaults(Box::new(MemoryStore::new()));
        board.submit("ada", "boxed", None).unwrap();
        assert_eq!(board.store().kind(), "memory");
        assert_eq!(board.fetch().unwrap().len(), 1);
    }
}
