use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::LocalFolder;
use crate::error::{Result, StoreError};
use crate::gate::{Access, Session};
use crate::mime::{
    calculate_preview, parse_disposition, AttachmentContent, AttachmentPart, Decomposed,
    MessageBody, WireMessage,
};
use crate::model::{
    from_millis, to_millis, Address, AttachmentRecord, Flag, FlagSet, HeaderField, LocalMessage,
    StoredBody, ThreadNode,
};
use crate::query::{
    attachments, headers, messages, threads, Delete, Insert, Order, Predicate, Projection, Select,
    Table, Update,
};
use crate::store::StoreInner;
use crate::threading::{self, ancestor_ids};

/// Which messages `get_messages` returns. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub include_deleted: bool,
    pub only_unread: bool,
    pub only_flagged: bool,
    /// Only messages sent after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl MessageFilter {
    fn apply(&self, mut select: Select) -> Select {
        if !self.include_deleted {
            select = select.filter(Predicate::Flag(Flag::Deleted, false));
        }
        if self.only_unread {
            select = select.filter(Predicate::Flag(Flag::Seen, false));
        }
        if self.only_flagged {
            select = select.filter(Predicate::Flag(Flag::Flagged, true));
        }
        if let Some(since) = &self.since {
            select = select.filter(Predicate::After(messages::DATE, to_millis(since)));
        }
        if let Some(limit) = self.limit {
            select = select.limit(i64::from(limit));
        }
        select
    }
}

const FLAG_COLUMNS: [(usize, Flag); 5] = [
    (17, Flag::Deleted),
    (18, Flag::Seen),
    (19, Flag::Flagged),
    (20, Flag::Answered),
    (21, Flag::Forwarded),
];

/// Message summary columns followed by the thread node columns
pub(super) fn message_select() -> Select {
    Select::from(Table::Messages)
        .left_join(Table::Threads, messages::ID, threads::MESSAGE_ID)
        .columns(messages::SUMMARY)
        .columns(threads::ALL)
}

fn addresses_from_json(raw: Option<String>) -> Vec<Address> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Unreadable stored address list");
        Vec::new()
    })
}

fn addresses_to_json(list: &[Address]) -> Result<Value> {
    if list.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Text(serde_json::to_string(list)?))
}

pub(super) fn row_to_message(row: &Row<'_>) -> rusqlite::Result<LocalMessage> {
    let mut flags = row
        .get::<_, Option<String>>(7)?
        .map(|raw| FlagSet::parse_extra(&raw))
        .unwrap_or_default();
    for (index, flag) in FLAG_COLUMNS {
        flags.set(flag, row.get(index)?);
    }

    let thread = match row.get::<_, Option<i64>>(22)? {
        Some(id) => Some(ThreadNode {
            id,
            message_row: row.get(23)?,
            root: row.get(24)?,
            parent: row.get(25)?,
        }),
        None => None,
    };

    Ok(LocalMessage {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        uid: row.get(2)?,
        message_id: row.get(3)?,
        subject: row.get(4)?,
        date: row.get::<_, Option<i64>>(5)?.and_then(from_millis),
        internal_date: row.get::<_, Option<i64>>(6)?.and_then(from_millis),
        flags,
        from: addresses_from_json(row.get(8)?),
        to: addresses_from_json(row.get(9)?),
        cc: addresses_from_json(row.get(10)?),
        bcc: addresses_from_json(row.get(11)?),
        reply_to: addresses_from_json(row.get(12)?),
        preview: row.get(13)?,
        mime_type: row.get(14)?,
        attachment_count: row.get(15)?,
        empty: row.get(16)?,
        thread,
        headers: Vec::new(),
    })
}

fn row_to_attachment(row: &Row<'_>) -> rusqlite::Result<AttachmentRecord> {
    Ok(AttachmentRecord {
        id: row.get(0)?,
        message_row: row.get(1)?,
        store_data: row.get(2)?,
        content_uri: row.get(3)?,
        size: row.get::<_, i64>(4)?.max(0) as u64,
        name: row.get(5)?,
        mime_type: row.get(6)?,
        content_id: row.get(7)?,
        content_disposition: row.get(8)?,
    })
}

/// Message with `uid` in the folder. Rows with content win over placeholders.
pub(super) fn find_by_uid(
    session: &Session<'_>,
    folder_id: i64,
    uid: &str,
) -> Result<Option<LocalMessage>> {
    session.select_row(
        &message_select()
            .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
            .filter(Predicate::eq(messages::UID, uid.to_string()))
            .order_by(messages::EMPTY, Order::Asc)
            .order_by(messages::ID, Order::Asc)
            .limit(1),
        row_to_message,
    )
}

fn generate_uid(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4())
}

/// Extra-flags text and the dedicated flag columns
fn with_flags(mut update: Update, flags: &FlagSet) -> Update {
    let extra = flags.serialize_extra();
    update = update.set(
        messages::FLAGS,
        if extra.is_empty() { Value::Null } else { Value::Text(extra) },
    );
    update
        .set(messages::DELETED, flags.contains(Flag::Deleted))
        .set(messages::READ, flags.contains(Flag::Seen))
        .set(messages::FLAGGED, flags.contains(Flag::Flagged))
        .set(messages::ANSWERED, flags.contains(Flag::Answered))
        .set(messages::FORWARDED, flags.contains(Flag::Forwarded))
}

fn load_headers(session: &Session<'_>, rows: &[i64]) -> Result<HashMap<i64, Vec<HeaderField>>> {
    let mut out: HashMap<i64, Vec<HeaderField>> = HashMap::new();
    if rows.is_empty() {
        return Ok(out);
    }

    let found: Vec<(i64, HeaderField)> = session.select(
        &Select::from(Table::Headers)
            .columns([headers::MESSAGE_ID, headers::NAME, headers::VALUE])
            .filter(Predicate::is_in(headers::MESSAGE_ID, rows.iter().copied()))
            .order_by(headers::ID, Order::Asc),
        |row| {
            let value: Option<String> = row.get(2)?;
            Ok((
                row.get(0)?,
                HeaderField::new(row.get::<_, String>(1)?, value.unwrap_or_default()),
            ))
        },
    )?;
    for (row, header) in found {
        out.entry(row).or_default().push(header);
    }
    Ok(out)
}

fn first_header<'a>(list: &'a [HeaderField], name: &str) -> Option<&'a str> {
    list.iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn save_headers(session: &Session<'_>, row_id: i64, message: &WireMessage) -> Result<()> {
    session.delete(
        &Delete::from(Table::Headers).filter(Predicate::eq(headers::MESSAGE_ID, row_id)),
    )?;
    for header in &message.headers {
        session.insert(
            &Insert::into(Table::Headers)
                .value(headers::MESSAGE_ID, row_id)
                .value(headers::NAME, header.name.clone())
                .value(headers::VALUE, header.value.clone()),
        )?;
    }
    Ok(())
}

fn load_body(session: &Session<'_>, row_id: i64) -> Result<StoredBody> {
    let content = session.select_row(
        &Select::from(Table::Messages)
            .columns([messages::TEXT_CONTENT, messages::HTML_CONTENT])
            .filter(Predicate::eq(messages::ID, row_id)),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let Some((text, html)) = content else {
        return Err(StoreError::MessageNotFound(row_id.to_string()));
    };

    let attachments = session.select(
        &Select::from(Table::Attachments)
            .columns(attachments::ALL)
            .filter(Predicate::eq(attachments::MESSAGE_ID, row_id))
            .order_by(attachments::ID, Order::Asc),
        row_to_attachment,
    )?;

    Ok(StoredBody {
        text,
        html,
        attachments,
    })
}

/// Delete payloads, then the attachment rows of a message
fn delete_attachments(store: &StoreInner, session: &Session<'_>, row_id: i64) -> Result<()> {
    let locators: Vec<Option<String>> = session.select(
        &Select::from(Table::Attachments)
            .columns([attachments::CONTENT_URI])
            .filter(Predicate::eq(attachments::MESSAGE_ID, row_id)),
        |row| row.get(0),
    )?;
    for locator in locators.into_iter().flatten() {
        store.attachments.delete(&locator)?;
    }
    session.delete(
        &Delete::from(Table::Attachments).filter(Predicate::eq(attachments::MESSAGE_ID, row_id)),
    )?;
    Ok(())
}

/// Remove a message row with its payloads, unlinking its thread node first
pub(super) fn destroy_row(
    store: &StoreInner,
    session: &Session<'_>,
    message: &LocalMessage,
) -> Result<()> {
    delete_attachments(store, session, message.id)?;
    if let Some(node) = threading::node_for_message(session, message.id)? {
        threading::detach(session, &node)?;
    }
    session.delete(&Delete::from(Table::Messages).filter(Predicate::eq(messages::ID, message.id)))?;
    debug!(row = message.id, uid = ?message.uid, "Destroyed message");
    Ok(())
}

fn rewrite_cid(session: &Session<'_>, row_id: i64, content_id: &str, locator: &str) -> Result<()> {
    let html: Option<String> = session.select_value(
        &Select::from(Table::Messages)
            .columns([messages::HTML_CONTENT])
            .filter(Predicate::eq(messages::ID, row_id)),
    )?;
    let Some(html) = html else {
        return Ok(());
    };

    let reference = format!("cid:{}", content_id);
    if html.contains(&reference) {
        session.update(
            &Update::table(Table::Messages)
                .set(messages::HTML_CONTENT, html.replace(&reference, locator))
                .filter(Predicate::eq(messages::ID, row_id)),
        )?;
    }
    Ok(())
}

/// Store one attachment of message `row_id`.
///
/// Payloads in hand go through a temporary blob and are moved into place
/// under the new attachment id. With `copy` set, or for parts that have no
/// row yet, an already stored payload is re-materialised for the new row.
fn save_attachment(
    store: &StoreInner,
    session: &Session<'_>,
    row_id: i64,
    part: &AttachmentPart,
    copy: bool,
) -> Result<i64> {
    let existing = if copy { None } else { part.attachment_id };
    let (kind, filename, disposition_size) = match part.content_disposition.as_deref() {
        Some(raw) => {
            let (kind, filename, size) = parse_disposition(raw);
            (Some(kind), filename, size)
        }
        None => (None, None, None),
    };

    let mut locator: Option<String> = None;
    let mut temp = None;
    match &part.content {
        AttachmentContent::Bytes(bytes) => {
            let mut blob = store.attachments.allocate_temp()?;
            blob.write_all(bytes)?;
            temp = Some(blob);
        }
        AttachmentContent::Stored(current) if existing.is_some() => {
            locator = Some(current.clone());
        }
        AttachmentContent::Stored(current) => {
            let bytes = store.attachments.read(current)?;
            let mut blob = store.attachments.allocate_temp()?;
            blob.write_all(&bytes)?;
            temp = Some(blob);
        }
        AttachmentContent::Remote => {}
    }

    let size = temp
        .as_ref()
        .map(|blob| blob.len())
        .or(part.size)
        .or(disposition_size)
        .unwrap_or(0);
    let size = i64::try_from(size).unwrap_or(i64::MAX);

    let attachment_id = match existing {
        Some(id) => {
            session.update(
                &Update::table(Table::Attachments)
                    .set(attachments::CONTENT_URI, locator.clone())
                    .set(attachments::SIZE, size)
                    .filter(Predicate::eq(attachments::ID, id)),
            )?;
            id
        }
        None => session.insert(
            &Insert::into(Table::Attachments)
                .value(attachments::MESSAGE_ID, row_id)
                .value(attachments::CONTENT_URI, locator.clone())
                .value(attachments::STORE_DATA, part.store_data.clone())
                .value(attachments::SIZE, size)
                .value(attachments::NAME, part.name.clone().or(filename))
                .value(attachments::MIME_TYPE, part.mime_type.clone())
                .value(attachments::CONTENT_ID, part.content_id.clone())
                .value(attachments::CONTENT_DISPOSITION, kind),
        )?,
    };

    if let Some(blob) = temp {
        let stored = store.attachments.finalize(blob, attachment_id)?;
        session.update(
            &Update::table(Table::Attachments)
                .set(attachments::CONTENT_URI, stored.clone())
                .filter(Predicate::eq(attachments::ID, attachment_id)),
        )?;
        locator = Some(stored);
    }

    if let (Some(content_id), Some(locator)) = (&part.content_id, &locator) {
        rewrite_cid(session, row_id, content_id, locator)?;
    }

    Ok(attachment_id)
}

/// Write content columns, attachments and headers of message row `row_id`
fn write_content(
    store: &StoreInner,
    session: &Session<'_>,
    row_id: i64,
    uid: &str,
    message: &WireMessage,
    copy: bool,
) -> Result<()> {
    let parts = if message.has_header(&store.config.identity_header) {
        store.decomposer.decompose_draft(message)?
    } else {
        store.decomposer.decompose(message)?
    };
    let preview = calculate_preview(parts.text.as_deref(), store.config.preview_length);

    let mut flags = message.flags.clone();
    flags.set(Flag::XGotAllHeaders, true);

    let update = Update::table(Table::Messages)
        .set(messages::UID, uid.to_string())
        .set(messages::MESSAGE_ID, message.message_id())
        .set(messages::SUBJECT, message.subject())
        .set(messages::DATE, message.sent_date().as_ref().map(to_millis))
        .set(messages::INTERNAL_DATE, message.internal_date.as_ref().map(to_millis))
        .set(messages::SENDER_LIST, addresses_to_json(&message.from())?)
        .set(messages::TO_LIST, addresses_to_json(&message.to())?)
        .set(messages::CC_LIST, addresses_to_json(&message.cc())?)
        .set(messages::BCC_LIST, addresses_to_json(&message.bcc())?)
        .set(messages::REPLY_TO_LIST, addresses_to_json(&message.reply_to())?)
        .set(messages::TEXT_CONTENT, parts.text.clone())
        .set(messages::HTML_CONTENT, parts.html.clone())
        .set(messages::PREVIEW, preview)
        .set(messages::MIME_TYPE, message.mime_type())
        .set(messages::ATTACHMENT_COUNT, parts.attachments.len() as i64)
        .set(messages::EMPTY, false)
        .filter(Predicate::eq(messages::ID, row_id));
    session.update(&with_flags(update, &flags))?;

    for part in &parts.attachments {
        save_attachment(store, session, row_id, part, copy)?;
    }
    save_headers(session, row_id, message)?;
    Ok(())
}

/// Append inside an open unit of work. See [`LocalFolder::append_messages`].
fn append_in(
    store: &StoreInner,
    session: &Session<'_>,
    folder_id: i64,
    batch: &mut [WireMessage],
    copy: bool,
) -> Result<HashMap<String, String>> {
    let mut uid_map = HashMap::new();

    for message in batch.iter_mut() {
        let source_uid = message.uid.clone();
        let mut replaced = None;

        let uid = match source_uid {
            Some(uid) if !copy => {
                if let Some(old) = find_by_uid(session, folder_id, &uid)? {
                    delete_attachments(store, session, old.id)?;
                    replaced = Some(old.id);
                }
                uid
            }
            source => {
                let fresh = generate_uid(&store.config.local_uid_prefix);
                if let (true, Some(old)) = (copy, source) {
                    uid_map.insert(old, fresh.clone());
                }
                message.uid = Some(fresh.clone());
                fresh
            }
        };

        let row_id = match replaced {
            Some(row_id) => row_id,
            None => {
                let message_id = message.message_id();
                let ancestors = ancestor_ids(
                    message_id.as_deref(),
                    message.header("References"),
                    message.header("In-Reply-To"),
                );
                let info = threading::resolve(session, folder_id, message_id.as_deref(), &ancestors)?;
                let row_id = match info.msg_id {
                    Some(placeholder) => placeholder,
                    None => session.insert(
                        &Insert::into(Table::Messages)
                            .value(messages::FOLDER_ID, folder_id)
                            .value(messages::UID, uid.clone())
                            .value(messages::MESSAGE_ID, message_id),
                    )?,
                };
                threading::attach(session, row_id, &info)?;
                row_id
            }
        };

        write_content(store, session, row_id, &uid, message, copy)?;
        debug!(uid = %uid, row = row_id, replaced = replaced.is_some(), "Stored message");
    }

    Ok(uid_map)
}

impl LocalFolder {
    fn count_where(&self, extra: Option<Predicate>) -> Result<u32> {
        self.read(|s, folder_id| {
            let mut select = Select::from(Table::Messages)
                .project(Projection::Count)
                .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                .filter(Predicate::NotEmpty)
                .filter(Predicate::Flag(Flag::Deleted, false));
            if let Some(predicate) = extra {
                select = select.filter(predicate);
            }
            let count: i64 = s.select_value(&select)?.unwrap_or(0);
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
    }

    /// Messages with content that are not marked deleted
    pub fn message_count(&self) -> Result<u32> {
        self.count_where(None)
    }

    pub fn unread_count(&self) -> Result<u32> {
        self.count_where(Some(Predicate::Flag(Flag::Seen, false)))
    }

    pub fn flagged_count(&self) -> Result<u32> {
        self.count_where(Some(Predicate::Flag(Flag::Flagged, true)))
    }

    /// Highest numeric UID seen by the last `update_last_uid`
    pub fn last_uid(&self) -> Option<u64> {
        self.last_uid.lock().ok().and_then(|guard| *guard)
    }

    /// Recompute the highest numeric UID among stored messages
    pub fn update_last_uid(&self) -> Result<Option<u64>> {
        let uids: Vec<String> = self.read(|s, folder_id| {
            s.select(
                &Select::from(Table::Messages)
                    .columns([messages::UID])
                    .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                    .filter(Predicate::NotEmpty)
                    .filter(Predicate::NotNull(messages::UID)),
                |row| row.get(0),
            )
        })?;
        let max = uids.iter().filter_map(|uid| uid.parse::<u64>().ok()).max();
        if let Ok(mut cached) = self.last_uid.lock() {
            *cached = max;
        }
        Ok(max)
    }

    pub fn oldest_message_date(&self) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self.read(|s, folder_id| {
            s.select_value(
                &Select::from(Table::Messages)
                    .project(Projection::Min(messages::DATE))
                    .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                    .filter(Predicate::NotEmpty),
            )
        })?;
        Ok(millis.and_then(from_millis))
    }

    /// Message with `uid`, placeholder or not
    pub fn get_message(&self, uid: &str) -> Result<Option<LocalMessage>> {
        self.read(|s, folder_id| find_by_uid(s, folder_id, uid))
    }

    /// Messages with content, newest first
    pub fn get_messages(&self, filter: &MessageFilter) -> Result<Vec<LocalMessage>> {
        self.read(|s, folder_id| {
            let select = message_select()
                .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                .filter(Predicate::NotEmpty)
                .order_by(messages::DATE, Order::Desc)
                .order_by(messages::ID, Order::Desc);
            s.select(&filter.apply(select), row_to_message)
        })
    }

    /// Messages for the given UIDs, in the order asked for. Unknown UIDs are
    /// skipped.
    pub fn get_messages_by_uids(&self, uids: &[String]) -> Result<Vec<LocalMessage>> {
        let batch = self.store.config.uid_check_batch_size.max(1);
        let mut found = self.read(|s, folder_id| {
            let mut found: HashMap<String, LocalMessage> = HashMap::new();
            for chunk in uids.chunks(batch) {
                let rows = s.select(
                    &message_select()
                        .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                        .filter(Predicate::is_in(messages::UID, chunk.iter().cloned()))
                        .order_by(messages::EMPTY, Order::Asc)
                        .order_by(messages::ID, Order::Asc),
                    row_to_message,
                )?;
                for message in rows {
                    if let Some(uid) = message.uid.clone() {
                        found.entry(uid).or_insert(message);
                    }
                }
            }
            Ok(found)
        })?;
        Ok(uids.iter().filter_map(|uid| found.remove(uid)).collect())
    }

    pub fn get_message_uid_by_id(&self, row_id: i64) -> Result<Option<String>> {
        self.read(|s, folder_id| {
            s.select_value(
                &Select::from(Table::Messages)
                    .columns([messages::UID])
                    .filter(Predicate::eq(messages::ID, row_id))
                    .filter(Predicate::eq(messages::FOLDER_ID, folder_id)),
            )
        })
    }

    /// Load stored headers into each message, in one query
    pub fn populate_headers(&self, batch: &mut [LocalMessage]) -> Result<()> {
        let rows: Vec<i64> = batch.iter().map(|m| m.id).collect();
        let mut loaded = self
            .store
            .gate
            .execute(Access::ReadOnly, |s| load_headers(s, &rows))?;
        for message in batch.iter_mut() {
            message.headers = loaded.remove(&message.id).unwrap_or_default();
        }
        Ok(())
    }

    /// Whether the full header set of `uid` has been captured
    pub fn has_all_headers(&self, uid: &str) -> Result<bool> {
        Ok(self
            .get_message(uid)?
            .map(|m| m.is_set(Flag::XGotAllHeaders))
            .unwrap_or(false))
    }

    /// Stored text, html and attachment rows of a message
    pub fn load_body(&self, message: &LocalMessage) -> Result<StoredBody> {
        self.store
            .gate
            .execute(Access::ReadOnly, |s| load_body(s, message.id))
    }

    /// Rebuild a message from the local store with a locally backed body.
    /// Attachment references in the html point back at `cid:` ids.
    pub fn to_wire(&self, message: &LocalMessage) -> Result<WireMessage> {
        let (body, mut header_map) = self.store.gate.execute(Access::ReadOnly, |s| {
            Ok((load_body(s, message.id)?, load_headers(s, &[message.id])?))
        })?;

        let mut html = body.html;
        for attachment in &body.attachments {
            if let (Some(html), Some(cid), Some(locator)) =
                (html.as_mut(), &attachment.content_id, &attachment.content_uri)
            {
                *html = html.replace(locator.as_str(), &format!("cid:{}", cid));
            }
        }

        let parts = body
            .attachments
            .into_iter()
            .map(|a| AttachmentPart {
                attachment_id: Some(a.id),
                mime_type: a
                    .mime_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                name: a.name,
                content_disposition: a.content_disposition,
                content_id: a.content_id,
                size: Some(a.size),
                store_data: a.store_data,
                content: match a.content_uri {
                    Some(locator) => AttachmentContent::Stored(locator),
                    None => AttachmentContent::Remote,
                },
            })
            .collect();

        Ok(WireMessage {
            uid: message.uid.clone(),
            flags: message.flags.clone(),
            internal_date: message.internal_date,
            headers: header_map.remove(&message.id).unwrap_or_default(),
            body: MessageBody::Local(Decomposed {
                text: body.text,
                html,
                attachments: parts,
            }),
        })
    }

    /// Store messages in one unit of work.
    ///
    /// A message without a UID gets a generated one, written back into the
    /// message. A message whose UID already exists replaces that row in place.
    /// Returns the UID mapping, which is empty unless copying.
    pub fn append_messages(&self, batch: &mut [WireMessage]) -> Result<HashMap<String, String>> {
        self.append(batch, false)
    }

    pub(crate) fn append(
        &self,
        batch: &mut [WireMessage],
        copy: bool,
    ) -> Result<HashMap<String, String>> {
        let count = batch.len();
        let uid_map = self.write(|s, folder_id| append_in(&self.store, s, folder_id, batch, copy))?;
        info!(folder = %self.name, count, copy, "Appended messages");
        Ok(uid_map)
    }

    /// Copy messages into `dest` under new UIDs. The source is left untouched.
    pub fn copy_messages(
        &self,
        uids: &[String],
        dest: &LocalFolder,
    ) -> Result<HashMap<String, String>> {
        let mut batch = Vec::with_capacity(uids.len());
        for message in self.get_messages_by_uids(uids)? {
            if message.empty {
                continue;
            }
            batch.push(self.to_wire(&message)?);
        }
        dest.append(&mut batch, true)
    }

    /// Move messages into `dest` under new UIDs.
    ///
    /// Each row relocates in place. The source keeps an empty, read and
    /// deleted placeholder under the old UID that takes over the old thread
    /// node.
    pub fn move_messages(
        &self,
        uids: &[String],
        dest: &LocalFolder,
    ) -> Result<HashMap<String, String>> {
        if dest.name == self.name {
            return Err(StoreError::InvalidInput(format!(
                "Cannot move messages from {} into itself",
                self.name
            )));
        }
        let dest_id = dest.id()?;
        let prefix = self.store.config.local_uid_prefix.clone();

        let uid_map = self.write(|s, source_id| {
            let mut uid_map = HashMap::new();
            for uid in uids {
                let Some(message) = find_by_uid(s, source_id, uid)? else {
                    warn!(folder = %self.name, uid = %uid, "Message to move not found");
                    continue;
                };
                if message.empty {
                    continue;
                }

                let fresh = generate_uid(&prefix);
                let old_node = threading::node_for_message(s, message.id)?;
                s.update(
                    &Update::table(Table::Messages)
                        .set(messages::FOLDER_ID, dest_id)
                        .set(messages::UID, fresh.clone())
                        .filter(Predicate::eq(messages::ID, message.id)),
                )?;

                let headers = load_headers(s, &[message.id])?;
                let stored = headers.get(&message.id).map(Vec::as_slice).unwrap_or_default();
                let ancestors = ancestor_ids(
                    message.message_id.as_deref(),
                    first_header(stored, "References"),
                    first_header(stored, "In-Reply-To"),
                );
                let info = threading::resolve(s, dest_id, message.message_id.as_deref(), &ancestors)?;
                threading::attach(s, message.id, &info)?;

                let placeholder = match info.msg_id {
                    Some(row) => {
                        s.update(
                            &Update::table(Table::Messages)
                                .set(messages::FOLDER_ID, source_id)
                                .set(messages::UID, uid.clone())
                                .set(messages::FLAGS, Value::Null)
                                .set(messages::READ, true)
                                .set(messages::DELETED, true)
                                .set(messages::EMPTY, true)
                                .filter(Predicate::eq(messages::ID, row)),
                        )?;
                        row
                    }
                    None => s.insert(
                        &Insert::into(Table::Messages)
                            .value(messages::FOLDER_ID, source_id)
                            .value(messages::UID, uid.clone())
                            .value(messages::MESSAGE_ID, message.message_id.clone())
                            .value(messages::READ, true)
                            .value(messages::DELETED, true)
                            .value(messages::EMPTY, true),
                    )?,
                };
                if let Some(node) = old_node {
                    s.update(
                        &Update::table(Table::Threads)
                            .set(threads::MESSAGE_ID, placeholder)
                            .filter(Predicate::eq(threads::ID, node.id)),
                    )?;
                }

                debug!(uid = %uid, new_uid = %fresh, placeholder, "Moved message");
                uid_map.insert(uid.clone(), fresh);
            }
            Ok(uid_map)
        })?;

        info!(from = %self.name, to = %dest.name, count = uid_map.len(), "Moved messages");
        Ok(uid_map)
    }

    /// Rewrite content and headers of a stored message. Attachments that
    /// already have rows are updated rather than recreated.
    pub fn update_message(&self, local: &LocalMessage, message: &WireMessage) -> Result<()> {
        let uid = message
            .uid
            .clone()
            .or_else(|| local.uid.clone())
            .ok_or_else(|| StoreError::InvalidInput("Message has no UID".to_string()))?;
        self.write(|s, _| write_content(&self.store, s, local.id, &uid, message, false))
    }

    /// Append one message and mark it fully downloaded, in one unit of work
    pub fn store_small_message(&self, message: &mut WireMessage) -> Result<LocalMessage> {
        self.write(|s, folder_id| {
            append_in(&self.store, s, folder_id, std::slice::from_mut(message), false)?;
            let uid = message
                .uid
                .clone()
                .ok_or_else(|| StoreError::InvalidInput("Message has no UID".to_string()))?;
            let stored = find_by_uid(s, folder_id, &uid)?
                .ok_or_else(|| StoreError::MessageNotFound(uid.clone()))?;

            let mut flags = stored.flags.clone();
            flags.set(Flag::XDownloadedFull, true);
            s.update(&with_flags(
                Update::table(Table::Messages).filter(Predicate::eq(messages::ID, stored.id)),
                &flags,
            ))?;

            Ok(LocalMessage { flags, ..stored })
        })
    }

    /// Replace the UID of message row `row_id`
    pub fn change_uid(&self, row_id: i64, uid: &str) -> Result<()> {
        let changed = self.write(|s, folder_id| {
            s.update(
                &Update::table(Table::Messages)
                    .set(messages::UID, uid.to_string())
                    .filter(Predicate::eq(messages::ID, row_id))
                    .filter(Predicate::eq(messages::FOLDER_ID, folder_id)),
            )
        })?;
        if changed == 0 {
            return Err(StoreError::MessageNotFound(row_id.to_string()));
        }
        Ok(())
    }

    /// Set or clear flags on one message
    pub fn set_message_flags(&self, uid: &str, flags: &[Flag], value: bool) -> Result<()> {
        self.write(|s, folder_id| {
            let message = find_by_uid(s, folder_id, uid)?
                .ok_or_else(|| StoreError::MessageNotFound(uid.to_string()))?;
            let mut updated = message.flags.clone();
            for flag in flags {
                updated.set(*flag, value);
            }
            s.update(&with_flags(
                Update::table(Table::Messages).filter(Predicate::eq(messages::ID, message.id)),
                &updated,
            ))?;
            Ok(())
        })
    }

    /// Best effort: a message that cannot be updated is logged and skipped.
    /// Returns the number of messages updated.
    pub fn set_flags(&self, uids: &[String], flags: &[Flag], value: bool) -> Result<usize> {
        self.ensure_open(super::OpenMode::ReadWrite)?;
        let mut updated = 0;
        for uid in uids {
            match self.set_message_flags(uid, flags, value) {
                Ok(()) => updated += 1,
                Err(e) => {
                    warn!(folder = %self.name, uid = %uid, error = %e, "Failed to set flags, skipping")
                }
            }
        }
        Ok(updated)
    }

    /// [`set_flags`](Self::set_flags) over every message with content
    pub fn set_flags_all(&self, flags: &[Flag], value: bool) -> Result<usize> {
        let uids: Vec<String> = self.read(|s, folder_id| {
            s.select(
                &Select::from(Table::Messages)
                    .columns([messages::UID])
                    .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                    .filter(Predicate::NotEmpty)
                    .filter(Predicate::NotNull(messages::UID)),
                |row| row.get(0),
            )
        })?;
        self.set_flags(&uids, flags, value)
    }

    /// Remove messages with their attachments, headers and thread nodes
    pub fn destroy_messages(&self, uids: &[String]) -> Result<()> {
        self.write(|s, folder_id| {
            for uid in uids {
                match find_by_uid(s, folder_id, uid)? {
                    Some(message) => destroy_row(&self.store, s, &message)?,
                    None => debug!(uid = %uid, "Nothing to destroy"),
                }
            }
            Ok(())
        })
    }

    /// The candidate UIDs not stored in this folder, in their original order.
    /// Placeholders count as stored.
    pub fn extract_new_messages(&self, candidates: &[String]) -> Result<Vec<String>> {
        let batch = self.store.config.uid_check_batch_size.max(1);
        self.read(|s, folder_id| {
            let mut present: HashSet<String> = HashSet::new();
            for chunk in candidates.chunks(batch) {
                let found: Vec<String> = s.select(
                    &Select::from(Table::Messages)
                        .columns([messages::UID])
                        .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
                        .filter(Predicate::is_in(messages::UID, chunk.iter().cloned())),
                    |row| row.get(0),
                )?;
                present.extend(found);
            }
            Ok(candidates
                .iter()
                .filter(|uid| !present.contains(*uid))
                .cloned()
                .collect())
        })
    }

    /// Messages with content in the conversation of `message`, root first
    pub fn conversation(&self, message: &LocalMessage) -> Result<Vec<LocalMessage>> {
        self.read(|s, _| {
            let node = match message.thread {
                Some(node) => Some(node),
                None => threading::node_for_message(s, message.id)?,
            };
            let Some(node) = node else {
                return Ok(Vec::new());
            };

            let nodes = threading::conversation(s, node.effective_root())?;
            let rows: Vec<i64> = nodes.iter().map(|n| n.message_row).collect();
            let mut found: HashMap<i64, LocalMessage> = s
                .select(
                    &message_select()
                        .filter(Predicate::is_in(messages::ID, rows.iter().copied()))
                        .filter(Predicate::NotEmpty),
                    row_to_message,
                )?
                .into_iter()
                .map(|m| (m.id, m))
                .collect();
            Ok(rows.iter().filter_map(|row| found.remove(row)).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::store::LocalStore;

    use super::*;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = LocalStore::in_memory(dir.path()).expect("Failed to open store");
        (dir, store)
    }

    fn plain(uid: &str, message_id: &str, body: &str) -> WireMessage {
        WireMessage::new(Some(uid.to_string()))
            .with_header("Message-ID", message_id)
            .with_header("Subject", "Hello")
            .with_header("From", "Alice <alice@example.com>")
            .with_header("Date", "Tue, 1 Jul 2003 10:52:37 +0200")
            .with_body(MessageBody::Local(Decomposed {
                text: Some(body.to_string()),
                html: None,
                attachments: Vec::new(),
            }))
    }

    #[test]
    fn test_append_and_get() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");

        let mut batch = vec![plain("1", "<a@example.com>", "Hi there\n> quoted")];
        let map = inbox.append_messages(&mut batch).expect("Append should succeed");
        assert!(map.is_empty());

        let message = inbox
            .get_message("1")
            .expect("Lookup should succeed")
            .expect("Message should exist");
        assert_eq!(message.subject.as_deref(), Some("Hello"));
        assert_eq!(message.from, vec![Address::with_name("alice@example.com", "Alice")]);
        assert_eq!(message.preview.as_deref(), Some("Hi there"));
        assert!(message.is_set(Flag::XGotAllHeaders));
        assert!(message.thread.expect("Should have a node").is_root());
        assert_eq!(inbox.message_count().expect("count"), 1);
        assert_eq!(inbox.unread_count().expect("count"), 1);
    }

    #[test]
    fn test_append_without_uid_generates_one() {
        let (_dir, store) = store();
        let drafts = store.folder("Drafts");

        let mut batch = vec![WireMessage::new(None).with_header("Subject", "Draft")];
        drafts.append_messages(&mut batch).expect("Append should succeed");

        let uid = batch[0].uid.clone().expect("UID should be assigned");
        assert!(uid.starts_with("LOCAL:"));
        assert!(drafts.get_message(&uid).expect("lookup").is_some());
    }

    #[test]
    fn test_flags_round_trip() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");
        inbox
            .append_messages(&mut [plain("1", "<a@x>", "a"), plain("2", "<b@x>", "b")])
            .expect("Append should succeed");

        inbox
            .set_message_flags("1", &[Flag::Seen, Flag::Draft], true)
            .expect("Set flags should succeed");
        let message = inbox.get_message("1").expect("lookup").expect("exists");
        assert!(message.is_set(Flag::Seen));
        assert!(message.is_set(Flag::Draft));
        assert_eq!(inbox.unread_count().expect("count"), 1);

        let updated = inbox
            .set_flags(&["2".to_string(), "missing".to_string()], &[Flag::Flagged], true)
            .expect("Bulk flags should not fail");
        assert_eq!(updated, 1);
        assert_eq!(inbox.flagged_count().expect("count"), 1);

        assert_eq!(inbox.set_flags_all(&[Flag::Seen], true).expect("all"), 2);
        assert_eq!(inbox.unread_count().expect("count"), 0);
    }

    #[test]
    fn test_attachment_stored_and_cid_rewritten() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");

        let message = WireMessage::new(Some("7".into()))
            .with_header("Message-ID", "<img@x>")
            .with_body(MessageBody::Local(Decomposed {
                text: Some("see picture".into()),
                html: Some("<img src=\"cid:logo@x\">".into()),
                attachments: vec![AttachmentPart {
                    attachment_id: None,
                    mime_type: "image/png".into(),
                    name: None,
                    content_disposition: Some("inline; filename=\"logo.png\"; size=99".into()),
                    content_id: Some("logo@x".into()),
                    size: None,
                    store_data: None,
                    content: AttachmentContent::Bytes(b"png!".to_vec()),
                }],
            }));
        inbox.append_messages(&mut [message]).expect("Append should succeed");

        let local = inbox.get_message("7").expect("lookup").expect("exists");
        assert_eq!(local.attachment_count, 1);
        let body = inbox.load_body(&local).expect("Body should load");
        let attachment = &body.attachments[0];
        assert_eq!(attachment.size, 4);
        assert_eq!(attachment.name.as_deref(), Some("logo.png"));
        assert_eq!(attachment.content_disposition.as_deref(), Some("inline"));

        let locator = attachment.content_uri.clone().expect("Payload should be stored");
        assert!(locator.ends_with(&attachment.id.to_string()));
        assert_eq!(
            body.html.as_deref(),
            Some(format!("<img src=\"{}\">", locator).as_str())
        );

        let wire = inbox.to_wire(&local).expect("Rebuild should succeed");
        let MessageBody::Local(parts) = wire.body else {
            panic!("Expected a locally backed body");
        };
        assert_eq!(parts.html.as_deref(), Some("<img src=\"cid:logo@x\">"));
    }

    #[test]
    fn test_remote_attachment_size_from_disposition() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");

        let message = WireMessage::new(Some("8".into())).with_body(MessageBody::Local(Decomposed {
            text: Some("later".into()),
            html: None,
            attachments: vec![AttachmentPart {
                attachment_id: None,
                mime_type: "application/pdf".into(),
                name: Some("doc.pdf".into()),
                content_disposition: Some("attachment; size=1234".into()),
                content_id: None,
                size: None,
                store_data: Some("1.2".into()),
                content: AttachmentContent::Remote,
            }],
        }));
        inbox.append_messages(&mut [message]).expect("Append should succeed");

        let local = inbox.get_message("8").expect("lookup").expect("exists");
        let body = inbox.load_body(&local).expect("Body should load");
        assert_eq!(body.attachments[0].size, 1234);
        assert!(body.attachments[0].content_uri.is_none());
        assert_eq!(body.attachments[0].store_data.as_deref(), Some("1.2"));
    }

    #[test]
    fn test_store_small_message_marks_downloaded() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");

        let mut message = plain("3", "<c@x>", "small");
        let stored = inbox
            .store_small_message(&mut message)
            .expect("Store should succeed");
        assert!(stored.is_set(Flag::XDownloadedFull));

        let reloaded = inbox.get_message("3").expect("lookup").expect("exists");
        assert!(reloaded.is_set(Flag::XDownloadedFull));
        assert!(inbox.has_all_headers("3").expect("headers"));
    }

    #[test]
    fn test_change_uid_and_lookup_by_id() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");
        inbox
            .append_messages(&mut [plain("10", "<d@x>", "d"), plain("12", "<e@x>", "e")])
            .expect("Append should succeed");

        let local = inbox.get_message("10").expect("lookup").expect("exists");
        inbox.change_uid(local.id, "11").expect("Change should succeed");
        assert_eq!(
            inbox.get_message_uid_by_id(local.id).expect("lookup").as_deref(),
            Some("11")
        );
        assert!(inbox.change_uid(9_999, "x").is_err());

        assert_eq!(inbox.update_last_uid().expect("update"), Some(12));
        assert_eq!(inbox.last_uid(), Some(12));
        assert!(inbox.oldest_message_date().expect("date").is_some());
    }

    #[test]
    fn test_get_messages_filter_and_order() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");
        let older = plain("1", "<o@x>", "old");
        let mut newer = plain("2", "<n@x>", "new");
        newer.headers.retain(|h| h.name != "Date");
        let newer = newer.with_header("Date", "Mon, 1 Jan 2024 00:00:00 +0000");
        inbox
            .append_messages(&mut [older, newer])
            .expect("Append should succeed");
        inbox
            .set_message_flags("1", &[Flag::Deleted], true)
            .expect("flag");

        let visible = inbox.get_messages(&MessageFilter::default()).expect("list");
        assert_eq!(visible.len(), 1);

        let all = inbox
            .get_messages(&MessageFilter {
                include_deleted: true,
                ..MessageFilter::default()
            })
            .expect("list");
        let uids: Vec<_> = all.iter().filter_map(|m| m.uid.as_deref()).collect();
        assert_eq!(uids, vec!["2", "1"]);

        let by_uid = inbox
            .get_messages_by_uids(&["1".to_string(), "nope".to_string(), "2".to_string()])
            .expect("lookup");
        let uids: Vec<_> = by_uid.iter().filter_map(|m| m.uid.as_deref()).collect();
        assert_eq!(uids, vec!["1", "2"]);
    }

    #[test]
    fn test_update_message_keeps_attachment_rows() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");
        let message = WireMessage::new(Some("5".into())).with_body(MessageBody::Local(Decomposed {
            text: Some("v1".into()),
            html: None,
            attachments: vec![AttachmentPart {
                attachment_id: None,
                mime_type: "text/csv".into(),
                name: Some("data.csv".into()),
                content_disposition: Some("attachment".into()),
                content_id: None,
                size: None,
                store_data: None,
                content: AttachmentContent::Bytes(b"a,b".to_vec()),
            }],
        }));
        inbox.append_messages(&mut [message]).expect("Append should succeed");

        let local = inbox.get_message("5").expect("lookup").expect("exists");
        let before = inbox.load_body(&local).expect("Body should load").attachments[0].id;
        let mut wire = inbox.to_wire(&local).expect("rebuild");
        if let MessageBody::Local(parts) = &mut wire.body {
            parts.text = Some("v2".into());
            parts.html = None;
        }
        inbox.update_message(&local, &wire).expect("Update should succeed");

        let body = inbox.load_body(&local).expect("Body should load");
        assert_eq!(body.text.as_deref(), Some("v2"));
        assert_eq!(body.attachments.len(), 1);
        assert_eq!(body.attachments[0].id, before);
    }
}
