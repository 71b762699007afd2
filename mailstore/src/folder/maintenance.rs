use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use tracing::{debug, info};

use super::messages::{destroy_row, message_select, row_to_message};
use super::LocalFolder;
use crate::error::Result;
use crate::gate::Session;
use crate::model::to_millis;
use crate::query::{attachments, folders, messages, threads, Delete, Order, Predicate, Select, Table, Update};
use crate::store::StoreInner;

fn folder_messages(folder_id: i64) -> Select {
    Select::from(Table::Messages)
        .columns([messages::ID])
        .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
}

/// Delete every attachment payload of the folder from the attachment store
fn delete_folder_payloads(store: &StoreInner, session: &Session<'_>, folder_id: i64) -> Result<usize> {
    let locators: Vec<Option<String>> = session.select(
        &Select::from(Table::Attachments)
            .columns([attachments::CONTENT_URI])
            .filter(Predicate::in_select(
                attachments::MESSAGE_ID,
                folder_messages(folder_id),
            )),
        |row| row.get(0),
    )?;

    let mut deleted = 0;
    for locator in locators.into_iter().flatten() {
        store.attachments.delete(&locator)?;
        deleted += 1;
    }
    Ok(deleted)
}

impl LocalFolder {
    /// Destroy the oldest messages beyond the visible limit. Does nothing
    /// while a search is active or when the limit is zero. Returns the UIDs
    /// removed.
    pub fn purge_to_visible_limit(&self) -> Result<Vec<String>> {
        if self.store.search_active() {
            debug!(folder = %self.name, "Search active, not purging");
            return Ok(Vec::new());
        }
        let limit = self.visible_limit()?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let purged = self.write(|s, folder_id| {
            let stale = s.select(
                &message_select()
                    .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                    .filter(Predicate::NotEmpty)
                    .order_by(messages::DATE, Order::Desc)
                    .order_by(messages::ID, Order::Desc)
                    .offset(i64::from(limit)),
                row_to_message,
            )?;
            for message in &stale {
                destroy_row(&self.store, s, message)?;
            }
            Ok(stale.into_iter().filter_map(|m| m.uid).collect::<Vec<_>>())
        })?;

        if !purged.is_empty() {
            info!(folder = %self.name, count = purged.len(), limit, "Purged to visible limit");
        }
        Ok(purged)
    }

    /// Remove every message, placeholders included, and reset sync state
    pub fn clear_all_messages(&self) -> Result<()> {
        let display_count = self.store.config.display_count;

        self.write(|s, folder_id| {
            delete_folder_payloads(&self.store, s, folder_id)?;
            s.delete(&Delete::from(Table::Attachments).filter(Predicate::in_select(
                attachments::MESSAGE_ID,
                folder_messages(folder_id),
            )))?;
            s.delete(&Delete::from(Table::Threads).filter(Predicate::in_select(
                threads::MESSAGE_ID,
                folder_messages(folder_id),
            )))?;
            let removed = s.delete(
                &Delete::from(Table::Messages).filter(Predicate::eq(messages::FOLDER_ID, folder_id)),
            )?;
            s.update(
                &Update::table(Table::Folders)
                    .set(folders::PUSH_STATE, Value::Null)
                    .set(folders::LAST_PUSHED, 0i64)
                    .set(folders::LAST_UPDATED, 0i64)
                    .set(folders::VISIBLE_LIMIT, i64::from(display_count))
                    .filter(Predicate::eq(folders::ID, folder_id)),
            )?;
            info!(folder = %self.name, removed, "Cleared all messages");
            Ok(())
        })?;

        self.update_cached(|r| {
            r.push_state = None;
            r.last_pushed = 0;
            r.last_checked = 0;
            r.visible_limit = display_count;
        });
        Ok(())
    }

    /// Destroy messages sent before `cutoff`. Returns how many were removed.
    pub fn clear_messages_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.write(|s, folder_id| {
            let old = s.select(
                &message_select()
                    .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                    .filter(Predicate::NotEmpty)
                    .filter(Predicate::Before(messages::DATE, to_millis(&cutoff))),
                row_to_message,
            )?;
            for message in &old {
                destroy_row(&self.store, s, message)?;
            }
            debug!(folder = %self.name, count = old.len(), %cutoff, "Cleared old messages");
            Ok(old.len())
        })
    }

    /// Delete the folder with its messages and preferences. Sub-folders are
    /// left to the caller.
    pub fn delete(&self) -> Result<()> {
        self.write(|s, folder_id| {
            let payloads = delete_folder_payloads(&self.store, s, folder_id)?;
            s.delete(&Delete::from(Table::Folders).filter(Predicate::eq(folders::ID, folder_id)))?;
            debug!(folder = %self.name, payloads, "Deleted folder row");
            Ok(())
        })?;
        self.close();
        self.delete_preferences()?;
        info!(folder = %self.name, "Deleted folder");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::mime::{AttachmentContent, AttachmentPart, Decomposed, MessageBody, WireMessage};
    use crate::model::Flag;
    use crate::store::LocalStore;

    use super::*;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = LocalStore::in_memory(dir.path()).expect("Failed to open store");
        (dir, store)
    }

    fn dated(uid: &str, year: i32) -> WireMessage {
        WireMessage::new(Some(uid.to_string()))
            .with_header("Message-ID", format!("<{}@x>", uid))
            .with_header("Date", format!("Mon, 1 Jan {} 00:00:00 +0000", year))
            .with_body(MessageBody::Local(Decomposed {
                text: Some(format!("body {}", uid)),
                html: None,
                attachments: vec![AttachmentPart {
                    attachment_id: None,
                    mime_type: "text/plain".into(),
                    name: Some("note.txt".into()),
                    content_disposition: Some("attachment".into()),
                    content_id: None,
                    size: None,
                    store_data: None,
                    content: AttachmentContent::Bytes(uid.as_bytes().to_vec()),
                }],
            }))
    }

    fn payload_count(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path())
            .expect("Attachment dir should exist")
            .count()
    }

    #[test]
    fn test_purge_keeps_newest() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");
        inbox
            .append_messages(&mut [dated("1", 2001), dated("2", 2002), dated("3", 2003)])
            .expect("Append should succeed");
        inbox.set_visible_limit(2).expect("limit");

        store.set_search_active(true);
        assert!(inbox.purge_to_visible_limit().expect("purge").is_empty());
        store.set_search_active(false);

        let purged = inbox.purge_to_visible_limit().expect("purge");
        assert_eq!(purged, vec!["1".to_string()]);
        assert_eq!(inbox.message_count().expect("count"), 2);
    }

    #[test]
    fn test_clear_all_resets_state() {
        let (dir, store) = store();
        let inbox = store.folder("INBOX");
        inbox
            .append_messages(&mut [dated("1", 2001), dated("2", 2002)])
            .expect("Append should succeed");
        inbox.set_visible_limit(100).expect("limit");
        inbox.set_push_state(Some("state".into())).expect("push state");
        assert_eq!(payload_count(&dir), 2);

        inbox.clear_all_messages().expect("Clear should succeed");
        assert_eq!(payload_count(&dir), 0);
        assert_eq!(inbox.message_count().expect("count"), 0);
        assert_eq!(inbox.visible_limit().expect("limit"), 25);
        assert!(inbox.push_state().expect("push state").is_none());
        assert!(inbox.get_message("1").expect("lookup").is_none());
    }

    #[test]
    fn test_clear_older_than() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");
        inbox
            .append_messages(&mut [dated("1", 2001), dated("2", 2010)])
            .expect("Append should succeed");

        let cutoff = Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(inbox.clear_messages_older_than(cutoff).expect("clear"), 1);
        assert!(inbox.get_message("1").expect("lookup").is_none());
        assert!(inbox.get_message("2").expect("lookup").is_some());
    }

    #[test]
    fn test_delete_folder() {
        let (dir, store) = store();
        let trash = store.folder("Trash");
        trash
            .append_messages(&mut [dated("1", 2001)])
            .expect("Append should succeed");
        trash.set_integrate(true).expect("integrate");
        trash.save_preferences().expect("save");
        trash
            .set_message_flags("1", &[Flag::Seen], true)
            .expect("flags");

        trash.delete().expect("Delete should succeed");
        assert!(!trash.is_open());
        assert!(!trash.exists().expect("exists"));
        assert_eq!(payload_count(&dir), 0);
        assert!(store.folders().expect("list").is_empty());
    }
}
