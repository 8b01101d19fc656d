//! The pure read-modify-write step applied to a loaded document.
//!
//! ```text
//! Submission ──► validate ──► next_id ──► attach ──► trim ──► SubmitOutcome
//!                  │                        │
//!                  ▼                        ▼
//!            BodyTooLong             TopLevel | Reply | Dropped
//! ```
//!
//! Parent lookup only looks at top-level messages and their direct
//! replies. A parent deeper than that, or one that does not exist
//! (negative ids included), leaves
//! the new message unattached (its id is still consumed) unless the board
//! is configured with [`OrphanPolicy::Reject`].
//!
//! Nothing here touches storage or the clock; the caller holds the
//! exclusive section and supplies the timestamp.

use crate::message::{Document, Message, MessageId};

/// Default retention cap on top-level messages.
pub const DEFAULT_MAX_MESSAGES: usize = 1000;

/// Default word limit for a message body.
pub const DEFAULT_MAX_WORDS: usize = 50;

/// What to do with a reply whose parent cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Accept the message, consume its id, attach it nowhere
    #[default]
    Drop,
    /// Fail the submission without writing
    Reject,
}

/// Board-wide policy knobs.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Top-level messages kept after each mutation. Default: 1000.
    pub max_messages: usize,
    /// Maximum words accepted in a body. Default: 50.
    pub max_words: usize,
    /// Handling of unresolvable parents. Default: drop.
    pub orphan_policy: OrphanPolicy,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_words: DEFAULT_MAX_WORDS,
            orphan_policy: OrphanPolicy::Drop,
        }
    }
}

impl BoardConfig {
    /// Config for testing (small retention window).
    pub fn for_testing(max_messages: usize) -> Self {
        Self {
            max_messages,
            ..Self::default()
        }
    }
}

/// An incoming message, before the board assigns an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub author: String,
    pub body: String,
    pub parent_id: Option<MessageId>,
}

impl Submission {
    /// A new top-level post.
    pub fn post(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            parent_id: None,
        }
    }

    /// A reply to `parent_id`.
    pub fn reply(author: impl Into<String>, body: impl Into<String>, parent_id: MessageId) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            parent_id: Some(parent_id),
        }
    }
}

/// Where an accepted message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// Appended to the end of the document
    TopLevel,
    /// Appended to the replies of `parent_id`; `depth` is 1 for a reply to
    /// a top-level message and 2 for a reply to a reply
    Reply { parent_id: MessageId, depth: usize },
    /// Parent not found within two levels; the message was not stored
    Dropped { parent_id: MessageId },
}

/// Result of applying one submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The message as constructed, returned to the caller regardless of
    /// attachment
    pub message: Message,
    pub attachment: Attachment,
    /// Top-level messages evicted by retention trimming
    pub evicted: usize,
}

/// Rejections raised before the document is modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Body has more words than the configured limit
    BodyTooLong { words: usize, limit: usize },
    /// Parent could not be resolved and the board rejects orphans
    ParentNotFound(MessageId),
    /// The document already holds `MessageId::MAX`, so `max + 1` has no value
    IdsExhausted,
}

impl std::fmt::Display for MutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationError::BodyTooLong { limit, .. } => {
                write!(f, "Message exceeds {limit} words")
            }
            MutationError::ParentNotFound(id) => write!(f, "Parent message {id} not found"),
            MutationError::IdsExhausted => write!(f, "Message id space exhausted"),
        }
    }
}

impl std::error::Error for MutationError {}

/// Count maximal runs of non-whitespace characters.
pub fn word_count(body: &str) -> usize {
    body.split_whitespace().count()
}

/// Check a submission against the board's word limit.
pub fn validate(submission: &Submission, config: &BoardConfig) -> Result<(), MutationError> {
    let words = word_count(&submission.body);
    if words > config.max_words {
        return Err(MutationError::BodyTooLong {
            words,
            limit: config.max_words,
        });
    }
    Ok(())
}

/// Apply one submission to a loaded document.
///
/// On `Err` the document is untouched and the caller must not persist.
/// On `Ok` the document has been mutated (possibly only trimmed, in the
/// drop case) and should be saved.
pub fn apply_submission(
    document: &mut Document,
    submission: Submission,
    timestamp: u64,
    config: &BoardConfig,
) -> Result<SubmitOutcome, MutationError> {
    validate(&submission, config)?;
    let id = document.next_id().ok_or(MutationError::IdsExhausted)?;

    let message = Message::new(
        id,
        timestamp,
        submission.author,
        submission.body,
        submission.parent_id,
    );

    let attachment = match attach(document.messages_mut(), message.clone()) {
        Ok(attachment) => attachment,
        Err(orphan) => {
            let parent_id = orphan.parent_id.unwrap_or_default();
            if config.orphan_policy == OrphanPolicy::Reject {
                return Err(MutationError::ParentNotFound(parent_id));
            }
            log::warn!(
                "Message {} dropped: parent {parent_id} not found within two levels",
                orphan.id
            );
            Attachment::Dropped { parent_id }
        }
    };

    let evicted = trim(document, config.max_messages);
    if evicted > 0 {
        log::debug!("Retention evicted {evicted} top-level messages");
    }

    Ok(SubmitOutcome {
        message,
        attachment,
        evicted,
    })
}

/// Attach `message` per its parent id, handing it back if no parent matched.
fn attach(messages: &mut Vec<Message>, message: Message) -> Result<Attachment, Message> {
    let Some(parent_id) = message.parent_id else {
        messages.push(message);
        return Ok(Attachment::TopLevel);
    };

    if let Some(parent) = messages.iter_mut().find(|m| m.id == parent_id) {
        parent.replies.push(message);
        return Ok(Attachment::Reply { parent_id, depth: 1 });
    }

    if let Some(parent) = messages
        .iter_mut()
        .flat_map(|m| m.replies.iter_mut())
        .find(|r| r.id == parent_id)
    {
        parent.replies.push(message);
        return Ok(Attachment::Reply { parent_id, depth: 2 });
    }

    Err(message)
}

/// Keep only the newest `max_messages` top-level entries. Returns how many
/// were evicted.
pub fn trim(document: &mut Document, max_messages: usize) -> usize {
    let messages = document.messages_mut();
    let excess = messages.len().saturating_sub(max_messages);
    if excess > 0 {
        messages.drain(..excess);
    }
    excess
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn submit(doc: &mut Document, submission: Submission) -> SubmitOutcome {
        apply_submission(doc, submission, NOW, &BoardConfig::default()).unwrap()
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn test_word_count_whitespace_runs() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("   "), 0);
        assert_eq!(word_count("one"), 1);
        assert_eq!(word_count("  one\ttwo\n\nthree  "), 3);
        assert_eq!(word_count("don't stop-me now!"), 3);
    }

    #[test]
    fn test_first_message_gets_id_zero() {
        let mut doc = Document::new();
        let out = submit(&mut doc, Submission::post("ada", "hello"));
        assert_eq!(out.message.id, 0);
        assert_eq!(out.message.timestamp, NOW);
        assert_eq!(out.attachment, Attachment::TopLevel);
        assert_eq!(doc.len(), 1);
        assert!(doc.messages()[0].replies.is_empty());
    }

    #[test]
    fn test_body_at_limit_accepted() {
        let mut doc = Document::new();
        let out = apply_submission(
            &mut doc,
            Submission::post("ada", words(50)),
            NOW,
            &BoardConfig::default(),
        );
        assert!(out.is_ok());
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_body_over_limit_rejected_without_mutation() {
        let mut doc = Document::new();
        submit(&mut doc, Submission::post("ada", "first"));
        let before = doc.clone();

        let err = apply_submission(
            &mut doc,
            Submission::post("ada", words(51)),
            NOW,
            &BoardConfig::default(),
        )
        .unwrap_err();

        assert_eq!(err, MutationError::BodyTooLong { words: 51, limit: 50 });
        assert_eq!(err.to_string(), "Message exceeds 50 words");
        assert_eq!(doc, before);
        assert_eq!(doc.next_id(), Some(1));
    }

    #[test]
    fn test_exhausted_id_space_rejected_without_mutation() {
        let last = Message::new(MessageId::MAX, NOW, "ada", "last", None);
        let mut doc = Document::from(vec![last]);
        let before = doc.clone();

        let err = apply_submission(
            &mut doc,
            Submission::post("bob", "one more"),
            NOW,
            &BoardConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, MutationError::IdsExhausted);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_reply_to_top_level() {
        let mut doc = Document::new();
        submit(&mut doc, Submission::post("ada", "root"));
        let out = submit(&mut doc, Submission::reply("bob", "child", 0));

        assert_eq!(out.message.id, 1);
        assert_eq!(out.attachment, Attachment::Reply { parent_id: 0, depth: 1 });
        assert_eq!(doc.len(), 1);
        let replies = &doc.messages()[0].replies;
        assert_eq!(replies.last().map(|m| m.id), Some(1));
    }

    #[test]
    fn test_reply_to_reply() {
        let mut doc = Document::new();
        submit(&mut doc, Submission::post("ada", "root"));
        submit(&mut doc, Submission::reply("bob", "child", 0));
        let out = submit(&mut doc, Submission::reply("cy", "grandchild", 1));

        assert_eq!(out.attachment, Attachment::Reply { parent_id: 1, depth: 2 });
        let root = &doc.messages()[0];
        assert_eq!(root.replies.len(), 1);
        assert_eq!(root.replies[0].replies.len(), 1);
        assert_eq!(root.replies[0].replies[0].id, 2);
    }

    #[test]
    fn test_reply_beyond_two_levels_is_dropped() {
        let mut doc = Document::new();
        submit(&mut doc, Submission::post("ada", "root"));
        submit(&mut doc, Submission::reply("bob", "child", 0));
        submit(&mut doc, Submission::reply("cy", "grandchild", 1));
        let before = doc.clone();

        // id 2 sits at depth 2, which the lookup never searches
        let out = submit(&mut doc, Submission::reply("dee", "too deep", 2));
        assert_eq!(out.message.id, 3);
        assert_eq!(out.attachment, Attachment::Dropped { parent_id: 2 });
        assert_eq!(doc, before);
    }

    #[test]
    fn test_unknown_parent_dropped_and_id_gap() {
        let mut doc = Document::new();
        submit(&mut doc, Submission::post("ada", "root"));
        let dropped = submit(&mut doc, Submission::reply("bob", "lost", 999));
        assert_eq!(dropped.message.id, 1);
        assert_eq!(doc.total_messages(), 1);

        // The dropped id was never stored, so max + 1 hands it out again
        let next = submit(&mut doc, Submission::post("cy", "next"));
        assert_eq!(next.message.id, 1);
    }

    #[test]
    fn test_unknown_parent_rejected_when_configured() {
        let config = BoardConfig {
            orphan_policy: OrphanPolicy::Reject,
            ..BoardConfig::default()
        };
        let mut doc = Document::new();
        apply_submission(&mut doc, Submission::post("ada", "root"), NOW, &config).unwrap();
        let before = doc.clone();

        let err =
            apply_submission(&mut doc, Submission::reply("bob", "x", 42), NOW, &config).unwrap_err();
        assert_eq!(err, MutationError::ParentNotFound(42));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_negative_parent_dropped() {
        let mut doc = Document::new();
        submit(&mut doc, Submission::post("ada", "root"));
        let before = doc.clone();

        let out = submit(&mut doc, Submission::reply("bob", "nowhere", -1));
        assert_eq!(out.message.id, 1);
        assert_eq!(out.message.parent_id, Some(-1));
        assert_eq!(out.attachment, Attachment::Dropped { parent_id: -1 });
        assert_eq!(doc, before);
    }

    #[test]
    fn test_first_match_wins_in_array_order() {
        // Duplicate ids cannot arise through submissions; build one by hand
        let mut a = Message::new(0, NOW, "ada", "a", None);
        a.replies.push(Message::new(5, NOW, "x", "first", Some(0)));
        let mut b = Message::new(1, NOW, "bob", "b", None);
        b.replies.push(Message::new(5, NOW, "y", "second", Some(1)));
        let mut doc = Document::from(vec![a, b]);

        submit(&mut doc, Submission::reply("cy", "to five", 5));
        assert_eq!(doc.messages()[0].replies[0].replies.len(), 1);
        assert!(doc.messages()[1].replies[0].replies.is_empty());
    }

    #[test]
    fn test_retention_keeps_newest_in_order() {
        let config = BoardConfig::for_testing(3);
        let mut doc = Document::new();
        let mut evicted = 0;
        for i in 0..5 {
            let out =
                apply_submission(&mut doc, Submission::post("ada", format!("m{i}")), NOW, &config)
                    .unwrap();
            evicted += out.evicted;
        }
        assert_eq!(evicted, 2);
        let bodies: Vec<&str> = doc.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_retention_evicts_whole_subtrees() {
        let config = BoardConfig::for_testing(2);
        let mut doc = Document::new();
        apply_submission(&mut doc, Submission::post("ada", "root"), NOW, &config).unwrap();
        apply_submission(&mut doc, Submission::reply("bob", "child", 0), NOW, &config).unwrap();
        apply_submission(&mut doc, Submission::post("cy", "two"), NOW, &config).unwrap();
        apply_submission(&mut doc, Submission::post("dee", "three"), NOW, &config).unwrap();

        assert_eq!(doc.len(), 2);
        assert!(doc.find(0).is_none());
        assert!(doc.find(1).is_none());
    }

    #[test]
    fn test_next_id_computed_from_live_document() {
        let config = BoardConfig::for_testing(1);
        let mut doc = Document::from(vec![Message::new(7, NOW, "ada", "old", None)]);
        let out =
            apply_submission(&mut doc, Submission::post("bob", "new"), NOW, &config).unwrap();
        assert_eq!(out.message.id, 8);
        assert_eq!(out.evicted, 1);
        assert_eq!(doc.next_id(), Some(9));

        // Once everything is evicted numbering restarts at zero
        trim(&mut doc, 0);
        assert!(doc.is_empty());
        assert_eq!(doc.next_id(), Some(0));
    }

    #[test]
    fn test_ids_unique_across_mixed_sequence() {
        let mut doc = Document::new();
        for i in 0..40i64 {
            let submission = match i % 4 {
                0 => Submission::post("ada", "top"),
                1 => Submission::reply("bob", "reply", i - 1),
                2 => Submission::reply("cy", "nested", i - 1),
                _ => Submission::reply("dee", "deep or lost", i - 1),
            };
            submit(&mut doc, submission);
        }
        let mut ids: Vec<MessageId> = doc.iter_all().map(|m| m.id).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }
}
