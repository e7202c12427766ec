//! Format-agnostic FAT archive engine
//!
//! All supported containers share one shape: files stored back to back
//! in a byte stream, described by a table of (offset, size, name)
//! records. This module owns everything common to that shape: the file
//! vector, offset arithmetic, shift propagation into every downstream
//! entry and every live open view, and the mutation operations
//! themselves. Format strategies plug in through [`FatHooks`] and only
//! ever touch their own on-disk FAT bytes.
//!
//! Mutations follow a fixed choreography inherited by every format:
//! the strategy edits its FAT records first, the engine shifts the
//! in-memory entries (index before offset, because strategies address
//! FAT slots by index), the file vector changes, and the data bytes
//! are spliced last through the segmented stream. `flush` lets the
//! strategy commit buffered state before the segmented stream is
//! materialized.

use crate::attribute::{AttrValue, Attribute};
use crate::entry::{name_eq, EntryAttrs, FileEntry};
use crate::error::{Error, Result};
use crate::filter::{FilterParams, FilterRegistry};
use crate::segment::SegmentedStream;
use crate::view::{FileView, SharedStream, Window};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shared reference to a live file entry.
///
/// The archive keeps the authoritative entry; handles identify it
/// across mutations and stay usable (though inert) after the entry is
/// removed.
#[derive(Clone)]
pub struct EntryHandle(pub(crate) Arc<Mutex<FileEntry>>);

impl EntryHandle {
    pub(crate) fn new(entry: FileEntry) -> Self {
        EntryHandle(Arc::new(Mutex::new(entry)))
    }

    /// Snapshot of the entry's current state.
    pub fn details(&self) -> FileEntry {
        self.0.lock().clone()
    }

    pub fn name(&self) -> String {
        self.0.lock().name.clone()
    }

    pub fn stored_size(&self) -> u64 {
        self.0.lock().stored_size
    }

    pub fn real_size(&self) -> u64 {
        self.0.lock().real_size
    }

    pub fn attrs(&self) -> EntryAttrs {
        self.0.lock().attrs
    }

    pub fn is_valid(&self) -> bool {
        self.0.lock().valid
    }

    /// Same underlying entry, regardless of snapshots taken.
    pub fn same(&self, other: &EntryHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let e = self.0.lock();
        f.debug_struct("EntryHandle")
            .field("name", &e.name)
            .field("index", &e.index)
            .field("offset", &e.offset)
            .field("stored_size", &e.stored_size)
            .field("valid", &e.valid)
            .finish()
    }
}

pub(crate) struct OpenWindow {
    window: Weak<Mutex<Window>>,
    entry: EntryHandle,
}

/// Re-point every live open view at its entry's current location and
/// drop views the caller has let go of.
pub(crate) fn refresh_windows(windows: &mut Vec<OpenWindow>) {
    windows.retain(|ow| {
        let Some(win) = ow.window.upgrade() else {
            return false;
        };
        let e = ow.entry.0.lock();
        let mut w = win.lock();
        w.offset = e.offset + e.header_len;
        w.len = e.stored_size;
        w.valid = e.valid;
        true
    });
}

/// What a strategy did with an attribute write.
pub enum AttrWrite {
    /// Header bytes already updated; nothing left for flush.
    Applied,
    /// Strategy will consult the `changed` flag during flush.
    Deferred,
}

/// Working context handed to every strategy hook: the backing
/// segmented stream, the current file vector, and the archive-level
/// attributes.
pub struct HookCtx<'a> {
    pub content: &'a mut SegmentedStream,
    pub entries: &'a [EntryHandle],
    pub attributes: &'a mut [Attribute],
    pub(crate) windows: &'a mut Vec<OpenWindow>,
}

impl HookCtx<'_> {
    /// Shift every entry starting at or after `from` by `delta_off`
    /// bytes and `delta_idx` FAT slots, skipping `skip`. Each moved
    /// entry's in-memory index is updated *before* the strategy's
    /// `update_offset` runs, because strategies locate the on-disk
    /// slot by index. Live open views are re-pointed afterwards.
    pub fn shift(
        &mut self,
        hooks: &mut dyn FatHooks,
        skip: Option<&EntryHandle>,
        from: u64,
        delta_off: i64,
        delta_idx: i64,
    ) -> Result<()> {
        for i in 0..self.entries.len() {
            let handle = self.entries[i].clone();
            if let Some(s) = skip {
                if s.same(&handle) {
                    continue;
                }
                let sg = s.0.lock();
                if sg.valid {
                    let e = handle.0.lock();
                    // A zero-length file sharing the skip entry's
                    // offset but sitting earlier in the FAT stays put.
                    if e.stored_size == 0 && e.offset == sg.offset && e.index < sg.index {
                        continue;
                    }
                }
            }
            let moved = {
                let mut e = handle.0.lock();
                if !e.valid || e.offset < from {
                    false
                } else {
                    e.offset = (e.offset as i64 + delta_off) as u64;
                    e.index = (e.index as i64 + delta_idx) as u32;
                    true
                }
            };
            if moved {
                let snap = handle.details();
                hooks.update_offset(self, &snap, delta_off)?;
            }
        }
        refresh_windows(self.windows);
        Ok(())
    }
}

/// Per-format mutation hooks.
///
/// A strategy implements the subset its container needs; the defaults
/// cover formats that store nothing for a given aspect (no names, no
/// offset fields, no size fields). Entry snapshots passed in already
/// carry the *new* values; `delta` parameters exist for strategies
/// that maintain derived fields of their own.
#[allow(unused_variables)]
pub trait FatHooks {
    /// Allocate the entry for an insert; override to seed
    /// format-private state.
    fn new_entry(&self) -> FileEntry {
        FileEntry::new()
    }

    /// Write `name` into the entry's on-disk FAT record.
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        Err(Error::NotSupported(
            "this file format does not store filenames".into(),
        ))
    }

    /// Write the entry's (already updated) offset into its FAT record.
    fn update_offset(&mut self, ctx: &mut HookCtx, entry: &FileEntry, delta: i64) -> Result<()> {
        Ok(())
    }

    /// Write the entry's (already updated) sizes into its FAT record.
    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, delta: i64) -> Result<()> {
        Ok(())
    }

    /// Splice a record for `new_entry` into the on-disk FAT. The entry
    /// is not in `ctx.entries` yet; adjust `new_entry.offset` for any
    /// FAT bytes inserted ahead of it and set `header_len` for
    /// embedded-FAT formats.
    fn pre_insert(
        &mut self,
        ctx: &mut HookCtx,
        before: Option<&FileEntry>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs after the data region exists and the entry joined the file
    /// vector (so `ctx.entries` includes it).
    fn post_insert(&mut self, ctx: &mut HookCtx, entry: &EntryHandle) -> Result<()> {
        Ok(())
    }

    /// Remove the entry's record from the on-disk FAT. The entry is
    /// still in `ctx.entries`; its data region is untouched until
    /// after the shift pass.
    fn pre_remove(&mut self, ctx: &mut HookCtx, entry: &FileEntry) -> Result<()> {
        Ok(())
    }

    fn post_remove(&mut self, ctx: &mut HookCtx, entry: &FileEntry) -> Result<()> {
        Ok(())
    }

    /// React to an archive-level attribute change. Runs before the
    /// engine stores the new value; returning an error leaves the
    /// archive untouched.
    fn attribute(&mut self, ctx: &mut HookCtx, index: usize, value: &AttrValue) -> Result<AttrWrite> {
        Ok(AttrWrite::Deferred)
    }

    /// Commit strategy-buffered state (encrypted FATs, description
    /// regions, attribute-backed header fields) before the segmented
    /// stream materializes.
    fn flush(&mut self, ctx: &mut HookCtx) -> Result<()> {
        Ok(())
    }

    /// Open a folder entry's raw data as a nested archive.
    fn open_folder(&self, entry: &FileEntry, data: Vec<u8>) -> Result<Archive> {
        Err(Error::NotSupported(
            "this archive format does not contain folders".into(),
        ))
    }
}

/// Everything a strategy constructor hands the engine.
pub(crate) struct ArchiveParts {
    pub entries: Vec<FileEntry>,
    pub attributes: Vec<Attribute>,
    pub off_first_file: u64,
    /// 0 disables the length check.
    pub len_max_filename: usize,
    pub format_code: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Unmodified,
    Dirty,
    Flushed,
}

pub struct Archive {
    content: SharedStream,
    hooks: Box<dyn FatHooks>,
    entries: Vec<EntryHandle>,
    attributes: Vec<Attribute>,
    windows: Vec<OpenWindow>,
    filters: FilterRegistry,
    off_first_file: u64,
    len_max_filename: usize,
    format_code: &'static str,
    state: ArchiveState,
    poisoned: bool,
}

impl Archive {
    pub(crate) fn assemble(
        content: SegmentedStream,
        hooks: Box<dyn FatHooks>,
        parts: ArchiveParts,
    ) -> Archive {
        Archive {
            content: Arc::new(Mutex::new(content)),
            hooks,
            entries: parts.entries.into_iter().map(EntryHandle::new).collect(),
            attributes: parts.attributes,
            windows: Vec::new(),
            filters: FilterRegistry::builtin(),
            off_first_file: parts.off_first_file,
            len_max_filename: parts.len_max_filename,
            format_code: parts.format_code,
            state: ArchiveState::Unmodified,
            poisoned: false,
        }
    }

    /// Code of the format strategy driving this archive.
    pub fn format_code(&self) -> &'static str {
        self.format_code
    }

    /// Snapshot of the file vector.
    pub fn files(&self) -> Vec<EntryHandle> {
        self.entries.clone()
    }

    /// ASCII case-insensitive filename lookup.
    pub fn find(&self, name: &str) -> Option<EntryHandle> {
        self.entries
            .iter()
            .find(|e| name_eq(&e.0.lock().name, name))
            .cloned()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Logical size of the container, pending edits included.
    pub fn size(&self) -> u64 {
        self.content.lock().len()
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check_mutable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        Ok(())
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if self.len_max_filename > 0 && name.len() > self.len_max_filename {
            return Err(Error::InvalidName(format!(
                "maximum filename length is {} chars",
                self.len_max_filename
            )));
        }
        if name.bytes().any(|b| b < 0x20) {
            return Err(Error::InvalidName(
                "control characters are not allowed in filenames".into(),
            ));
        }
        Ok(())
    }

    fn with_ctx<R>(
        &mut self,
        f: impl FnOnce(&mut Box<dyn FatHooks>, &mut HookCtx) -> R,
    ) -> R {
        let mut guard = self.content.lock();
        let mut ctx = HookCtx {
            content: &mut *guard,
            entries: &self.entries,
            attributes: &mut self.attributes,
            windows: &mut self.windows,
        };
        f(&mut self.hooks, &mut ctx)
    }

    /// Poison on failures that may have half-written the FAT; clean
    /// validation failures pass through untouched.
    fn guard_pre(&mut self, r: Result<()>) -> Result<()> {
        if let Err(e) = r {
            if e.is_partial_write() {
                self.poisoned = true;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Any failure after on-disk mutation started poisons the archive.
    fn guard_post<T>(&mut self, r: Result<T>) -> Result<T> {
        match r {
            Ok(v) => Ok(v),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn valid_snapshot(&self, handle: &EntryHandle) -> Result<FileEntry> {
        let snap = handle.details();
        if !snap.valid {
            return Err(Error::StaleHandle);
        }
        Ok(snap)
    }

    /// Open a raw view over the entry's stored data. The view tracks
    /// the entry across later inserts, removes and resizes.
    pub fn open(&mut self, handle: &EntryHandle) -> Result<FileView> {
        let snap = self.valid_snapshot(handle)?;
        let window = Arc::new(Mutex::new(Window {
            offset: snap.offset + snap.header_len,
            len: snap.stored_size,
            valid: true,
        }));
        self.windows.push(OpenWindow {
            window: Arc::downgrade(&window),
            entry: handle.clone(),
        });
        Ok(FileView::new(self.content.clone(), window))
    }

    /// Read the entry's content, decoding through its filter when it
    /// has one.
    pub fn read_file(&mut self, handle: &EntryHandle) -> Result<Vec<u8>> {
        let snap = self.valid_snapshot(handle)?;
        let mut raw = vec![0u8; snap.stored_size as usize];
        self.content
            .lock()
            .read_at(snap.offset + snap.header_len, &mut raw)?;
        match &snap.filter {
            None => Ok(raw),
            Some(name) => self
                .filters
                .get(name)?
                .decode(&raw, &FilterParams::default()),
        }
    }

    /// Replace the entry's content, encoding through its filter when
    /// it has one. The stored region is resized to the encoded length
    /// and the FAT updated before the bytes land.
    pub fn write_file(&mut self, handle: &EntryHandle, data: &[u8]) -> Result<()> {
        self.check_mutable()?;
        let snap = self.valid_snapshot(handle)?;
        let stored = match &snap.filter {
            None => data.to_vec(),
            Some(name) => self
                .filters
                .get(name)?
                .encode(data, &FilterParams::default())?,
        };
        self.resize(handle, stored.len() as u64, data.len() as u64)?;
        let snap = handle.details();
        let r = self
            .content
            .lock()
            .write_at(snap.offset + snap.header_len, &stored);
        self.guard_post(r)?;
        self.state = ArchiveState::Dirty;
        Ok(())
    }

    /// Insert a new file before `before`, or at the end of the archive
    /// when `before` is `None` or no longer valid. The data region is
    /// spliced in zero-filled; write content through
    /// [`Archive::write_file`] or an open view afterwards.
    pub fn insert(
        &mut self,
        before: Option<&EntryHandle>,
        name: &str,
        stored_size: u64,
        file_type: &str,
        attrs: EntryAttrs,
    ) -> Result<EntryHandle> {
        self.check_mutable()?;
        self.validate_name(name)?;
        debug!(name, stored_size, format = self.format_code, "insert file");

        let before_valid = matches!(before, Some(b) if b.is_valid());
        let before_snap = if before_valid {
            Some(self.valid_snapshot(before.unwrap())?)
        } else {
            None
        };

        let mut new = self.hooks.new_entry();
        new.name = name.to_string();
        new.stored_size = stored_size;
        new.real_size = stored_size;
        new.file_type = file_type.to_string();
        new.attrs = attrs;
        new.header_len = 0;
        new.valid = false;
        match (&before_snap, self.entries.last()) {
            (Some(b), _) => {
                new.offset = b.offset;
                new.index = b.index;
            }
            (None, Some(last)) => {
                let l = last.details();
                new.offset = l.end();
                new.index = l.index + 1;
            }
            (None, None) => {
                new.offset = self.off_first_file;
                new.index = 0;
            }
        }

        let r = self.with_ctx(|h, ctx| h.pre_insert(ctx, before_snap.as_ref(), &mut new));
        self.guard_pre(r)?;
        new.valid = true;
        let handle = EntryHandle::new(new);

        if before_valid {
            let (from, delta) = {
                let e = handle.0.lock();
                (e.offset + e.header_len, e.stored_size as i64)
            };
            let r = self.with_ctx(|h, ctx| ctx.shift(h.as_mut(), Some(&handle), from, delta, 1));
            self.guard_post(r)?;
            let pos = self
                .entries
                .iter()
                .position(|e| e.same(before.unwrap()))
                .ok_or(Error::StaleHandle)?;
            self.entries.insert(pos, handle.clone());
        } else {
            self.entries.push(handle.clone());
        }

        let r = {
            let e = handle.details();
            let mut c = self.content.lock();
            c.seek_to(e.offset + e.header_len)
                .and_then(|_| c.insert(e.stored_size))
        };
        self.guard_post(r)?;

        let r = self.with_ctx(|h, ctx| h.post_insert(ctx, &handle));
        self.guard_post(r)?;

        refresh_windows(&mut self.windows);
        self.state = ArchiveState::Dirty;
        Ok(handle)
    }

    /// Remove a file. The handle stays allocated but turns invalid;
    /// open views onto the entry stop working.
    pub fn remove(&mut self, handle: &EntryHandle) -> Result<()> {
        self.check_mutable()?;
        let snap = self.valid_snapshot(handle)?;
        debug!(name = %snap.name, format = self.format_code, "remove file");
        let pos = self
            .entries
            .iter()
            .position(|e| e.same(handle))
            .ok_or(Error::StaleHandle)?;

        let r = self.with_ctx(|h, ctx| h.pre_remove(ctx, &snap));
        self.guard_pre(r)?;

        self.entries.remove(pos);

        // The hook's own shift pass (FAT shrink) may have moved this
        // entry too; everything below works from its current position.
        let snap = handle.details();
        let r = self.with_ctx(|h, ctx| {
            ctx.shift(
                h.as_mut(),
                Some(handle),
                snap.offset,
                -((snap.stored_size + snap.header_len) as i64),
                -1,
            )
        });
        self.guard_post(r)?;

        let r = {
            let mut c = self.content.lock();
            c.seek_to(snap.offset)
                .and_then(|_| c.remove(snap.stored_size + snap.header_len))
        };
        self.guard_post(r)?;

        handle.0.lock().valid = false;

        let r = self.with_ctx(|h, ctx| h.post_remove(ctx, &snap));
        self.guard_post(r)?;

        refresh_windows(&mut self.windows);
        self.state = ArchiveState::Dirty;
        Ok(())
    }

    /// Rename a file. The on-disk record may hold a normalized form
    /// (uppercased, truncated to the format's field width); the
    /// in-memory name keeps what the caller passed.
    pub fn rename(&mut self, handle: &EntryHandle, name: &str) -> Result<()> {
        self.check_mutable()?;
        self.validate_name(name)?;
        let snap = self.valid_snapshot(handle)?;
        debug!(from = %snap.name, to = name, "rename file");

        let r = self.with_ctx(|h, ctx| h.update_name(ctx, &snap, name));
        self.guard_pre(r)?;

        handle.0.lock().name = name.to_string();
        self.state = ArchiveState::Dirty;
        Ok(())
    }

    /// Change the entry's stored and real sizes, splicing data bytes
    /// in or out and shifting everything behind it.
    pub fn resize(&mut self, handle: &EntryHandle, new_stored: u64, new_real: u64) -> Result<()> {
        self.check_mutable()?;
        let old = self.valid_snapshot(handle)?;
        let delta = new_stored as i64 - old.stored_size as i64;

        {
            let mut e = handle.0.lock();
            e.stored_size = new_stored;
            e.real_size = new_real;
        }
        let snap = handle.details();
        let r = self.with_ctx(|h, ctx| h.update_size(ctx, &snap, delta));
        if let Err(e) = r {
            let mut eg = handle.0.lock();
            eg.stored_size = old.stored_size;
            eg.real_size = old.real_size;
            drop(eg);
            return self.guard_pre(Err(e));
        }

        if delta == 0 {
            if old.real_size != new_real {
                self.state = ArchiveState::Dirty;
            }
            return Ok(());
        }

        // Re-read position in case the hook shifted this entry.
        let snap = handle.details();
        let start = if delta > 0 {
            snap.offset + snap.header_len + old.stored_size
        } else {
            snap.offset + snap.header_len + new_stored
        };
        let r = {
            let mut c = self.content.lock();
            c.seek_to(start).and_then(|_| {
                if delta > 0 {
                    c.insert(delta as u64)
                } else {
                    c.remove((-delta) as u64)
                }
            })
        };
        self.guard_post(r)?;

        let r = self.with_ctx(|h, ctx| ctx.shift(h.as_mut(), Some(handle), start, delta, 0));
        self.guard_post(r)?;

        refresh_windows(&mut self.windows);
        self.state = ArchiveState::Dirty;
        Ok(())
    }

    /// Reposition a file before `before` (or at the end), keeping the
    /// caller's handle attached to the same logical file.
    pub fn move_entry(&mut self, before: Option<&EntryHandle>, handle: &EntryHandle) -> Result<()> {
        self.check_mutable()?;
        let src = self.valid_snapshot(handle)?;
        if let Some(b) = before {
            if b.same(handle) {
                return Ok(());
            }
        }
        debug!(name = %src.name, "move file");

        let mut data = vec![0u8; src.stored_size as usize];
        self.content
            .lock()
            .read_at(src.offset + src.header_len, &mut data)?;

        let staged = self.insert(
            before,
            &src.name,
            src.stored_size,
            &src.file_type,
            src.attrs,
        )?;
        let staged_snap = staged.details();
        if staged_snap.filter != src.filter {
            self.remove(&staged)?;
            return Err(Error::NotSupported(
                "cannot move file to this position (filter change)".into(),
            ));
        }

        let r = self
            .content
            .lock()
            .write_at(staged_snap.offset + staged_snap.header_len, &data);
        self.guard_post(r)?;
        if staged_snap.filter.is_some() {
            self.resize(&staged, src.stored_size, src.real_size)?;
        }

        self.remove(handle)?;

        // Keep the caller's handle as the live identity: adopt the
        // staged entry's state into it and retire the staged handle.
        let pos = self
            .entries
            .iter()
            .position(|e| e.same(&staged))
            .ok_or(Error::StaleHandle)?;
        {
            let staged_state = staged.details();
            let mut old = handle.0.lock();
            *old = staged_state;
        }
        self.entries[pos] = handle.clone();
        staged.0.lock().valid = false;

        refresh_windows(&mut self.windows);
        Ok(())
    }

    /// Change an archive-level attribute. The strategy may veto the
    /// change or write it straight into the header; otherwise the
    /// `changed` flag stays set for its flush pass.
    pub fn set_attribute(&mut self, index: usize, value: AttrValue) -> Result<()> {
        self.check_mutable()?;
        let attr = self
            .attributes
            .get(index)
            .ok_or_else(|| Error::NotSupported(format!("no attribute {}", index)))?;
        attr.validate(&value)?;

        let r = self.with_ctx(|h, ctx| h.attribute(ctx, index, &value));
        let write = match r {
            Ok(w) => w,
            Err(e) => {
                if e.is_partial_write() {
                    self.poisoned = true;
                }
                return Err(e);
            }
        };

        let attr = &mut self.attributes[index];
        attr.value = value;
        attr.changed = matches!(write, AttrWrite::Deferred);
        self.state = ArchiveState::Dirty;
        Ok(())
    }

    /// Open a folder entry's data region as a nested archive.
    ///
    /// The nested archive operates on a snapshot of the folder's
    /// bytes; to persist nested changes, resize the folder entry and
    /// write the nested container back through `write_file`.
    pub fn open_folder(&mut self, handle: &EntryHandle) -> Result<Archive> {
        let snap = self.valid_snapshot(handle)?;
        if !snap.attrs.contains(EntryAttrs::FOLDER) {
            return Err(Error::NotSupported(format!(
                "{:?} is not a folder",
                snap.name
            )));
        }
        let mut data = vec![0u8; snap.stored_size as usize];
        self.content
            .lock()
            .read_at(snap.offset + snap.header_len, &mut data)?;
        self.hooks.open_folder(&snap, data)
    }

    /// Commit all pending changes to the backing stream.
    pub fn flush(&mut self) -> Result<()> {
        self.check_mutable()?;
        debug!(format = self.format_code, "flush archive");

        let r = self.with_ctx(|h, ctx| h.flush(ctx));
        self.guard_post(r)?;

        let r = self.content.lock().commit();
        self.guard_post(r)?;

        for a in &mut self.attributes {
            a.changed = false;
        }
        self.state = ArchiveState::Flushed;
        Ok(())
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        // Callers may still hold handles without the archive; make
        // sure those reject further use.
        for e in &self.entries {
            e.0.lock().valid = false;
        }
        refresh_windows(&mut self.windows);
    }
}
