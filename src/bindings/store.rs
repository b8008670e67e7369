//! BindingStore - the binding table, in authoring order
//!
//! Single writer: the store lives on the consumer thread next to the engine.
//! Other threads author through the bridge's command channel.

use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use super::persistence::{BindingDocument, DocumentFormat};
use super::{Binding, BindingId};
use crate::error::{Error, Result};
use crate::midi::MidiEvent;

#[derive(Debug, Default)]
pub struct BindingStore {
    /// Authoring order
    bindings: Vec<Binding>,
    next_id: u64,
    revision: u64,
    /// Digest of the document text last loaded or saved
    synced: Option<Vec<u8>>,
}

impl BindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a binding, assigning it a fresh id
    pub fn add(&mut self, mut binding: Binding) -> BindingId {
        let id = self.allocate_id();
        binding.id = id;
        debug!("Binding added: {}", binding);
        self.bindings.push(binding);
        self.bump();
        id
    }

    /// One past the highest id handed out; once that is exhausted, the
    /// lowest id not in use
    fn allocate_id(&mut self) -> BindingId {
        if let Some(next) = self.next_id.checked_add(1) {
            self.next_id = next;
            return BindingId(next);
        }
        let mut taken: Vec<u64> = self.bindings.iter().map(|b| b.id.as_raw()).collect();
        taken.sort_unstable();
        let mut free = 1;
        for id in taken {
            if id > free {
                break;
            }
            if id == free {
                free += 1;
            }
        }
        BindingId(free)
    }

    /// Replace a binding in place; id and authoring position are kept
    pub fn update(&mut self, id: BindingId, mut binding: Binding) -> Result<()> {
        let slot = self.slot_mut(id)?;
        binding.id = id;
        *slot = binding;
        debug!("Binding updated: {}", slot);
        self.bump();
        Ok(())
    }

    pub fn remove(&mut self, id: BindingId) -> Result<Binding> {
        let index = self.position(id)?;
        let removed = self.bindings.remove(index);
        debug!("Binding removed: {}", removed);
        self.bump();
        Ok(removed)
    }

    pub fn set_enabled(&mut self, id: BindingId, enabled: bool) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.enabled != enabled {
            slot.enabled = enabled;
            debug!("Binding {} {}", id, if enabled { "enabled" } else { "disabled" });
        }
        self.bump();
        Ok(())
    }

    pub fn get(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.id == id)
    }

    /// All bindings in authoring order
    pub fn iter(&self) -> impl Iterator<Item = &Binding> + '_ {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Enabled bindings matching `event`, in authoring order
    pub fn find_candidates<'a>(
        &'a self,
        event: &'a MidiEvent,
    ) -> impl Iterator<Item = &'a Binding> + 'a {
        self.bindings.iter().filter(move |b| b.matches(event))
    }

    /// Increases on every mutation, including loads
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replace the whole table from a document
    ///
    /// On any error the current table is left untouched. Returns the number
    /// of bindings loaded.
    pub fn load<R: Read>(&mut self, mut reader: R, format: DocumentFormat) -> Result<usize> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let bindings = BindingDocument::parse(&text, format)
            .and_then(BindingDocument::into_bindings)
            .inspect_err(|e| warn!("Mapping document rejected: {}", e))?;

        let count = bindings.len();
        self.next_id = bindings.iter().map(|b| b.id.as_raw()).max().unwrap_or(0);
        self.bindings = bindings;
        self.synced = Some(Sha256::digest(text.as_bytes()).to_vec());
        self.bump();
        debug!("Binding table replaced ({} bindings)", count);
        Ok(count)
    }

    pub fn save<W: Write>(&self, mut writer: W, format: DocumentFormat) -> Result<()> {
        BindingDocument::from_bindings(&self.bindings).write(&mut writer, format)?;
        writer.flush()?;
        Ok(())
    }

    /// `load` from a file, format picked by extension
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let count = self.load(std::io::BufReader::new(file), DocumentFormat::from_path(path))?;
        info!("✅ Loaded {} bindings from {}", count, path.display());
        Ok(count)
    }

    /// `save` to a file, format picked by extension
    ///
    /// Writes a sibling temp file and renames it over the target so a failed
    /// write never truncates the previous document.
    pub fn save_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut document = Vec::new();
        self.save(&mut document, DocumentFormat::from_path(path))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &document)?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::Io(e)
        })?;
        self.synced = Some(Sha256::digest(&document).to_vec());
        info!("💾 Saved {} bindings to {}", self.len(), path.display());
        Ok(())
    }

    /// Whether `path` holds exactly the document this table was last loaded
    /// from or saved to
    pub fn is_synced_with(&self, path: impl AsRef<Path>) -> bool {
        let Some(synced) = &self.synced else {
            return false;
        };
        match std::fs::read(path) {
            Ok(contents) => Sha256::digest(&contents).as_slice() == synced.as_slice(),
            Err(_) => false,
        }
    }

    fn position(&self, id: BindingId) -> Result<usize> {
        self.bindings
            .iter()
            .position(|b| b.id == id)
            .ok_or(Error::UnknownBinding(id))
    }

    fn slot_mut(&mut self, id: BindingId) -> Result<&mut Binding> {
        let index = self.position(id)?;
        Ok(&mut self.bindings[index])
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{PrimaryFilter, Transform};
    use crate::devices::DeviceId;
    use crate::midi::EventKind;
    use tempfile::TempDir;

    fn cc(controller: u8) -> MidiEvent {
        MidiEvent::new(DeviceId::from_raw(1), 0, EventKind::ControlChange, controller, 64, 0)
    }

    fn cc_binding(controller: u8, action: &str) -> Binding {
        Binding::new(EventKind::ControlChange, action).primary(PrimaryFilter::Exact(controller))
    }

    #[test]
    fn test_add_assigns_unique_ids() {
        let mut store = BindingStore::new();
        let a = store.add(cc_binding(1, "a"));
        let b = store.add(cc_binding(1, "b"));
        assert_ne!(a, b);
        assert_eq!(store.get(a).map(|b| &*b.action_ref), Some("a"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_candidates_in_authoring_order() {
        let mut store = BindingStore::new();
        store.add(cc_binding(1, "first"));
        store.add(cc_binding(2, "other"));
        store.add(cc_binding(1, "second"));

        let event = cc(1);
        let actions: Vec<_> = store.find_candidates(&event).map(|b| &*b.action_ref).collect();
        assert_eq!(actions, vec!["first", "second"]);
    }

    #[test]
    fn test_update_keeps_id_and_position() {
        let mut store = BindingStore::new();
        let first = store.add(cc_binding(1, "a"));
        store.add(cc_binding(1, "b"));

        store.update(first, cc_binding(1, "a2")).unwrap();
        let actions: Vec<_> = store.iter().map(|b| (b.id, b.action_ref.to_string())).collect();
        assert_eq!(actions[0], (first, "a2".to_string()));
    }

    #[test]
    fn test_unknown_id_errors() {
        let mut store = BindingStore::new();
        let missing = BindingId::from_raw(42);
        assert!(matches!(store.remove(missing), Err(Error::UnknownBinding(id)) if id == missing));
        assert!(matches!(store.set_enabled(missing, false), Err(Error::UnknownBinding(_))));
        assert!(matches!(
            store.update(missing, cc_binding(1, "x")),
            Err(Error::UnknownBinding(_))
        ));
    }

    #[test]
    fn test_disabled_binding_is_not_a_candidate() {
        let mut store = BindingStore::new();
        let id = store.add(cc_binding(1, "a"));
        store.set_enabled(id, false).unwrap();
        let event = cc(1);
        assert_eq!(store.find_candidates(&event).count(), 0);
        store.set_enabled(id, true).unwrap();
        assert_eq!(store.find_candidates(&event).count(), 1);
    }

    #[test]
    fn test_remove_returns_binding() {
        let mut store = BindingStore::new();
        let id = store.add(cc_binding(3, "gone"));
        let removed = store.remove(id).unwrap();
        assert_eq!(&*removed.action_ref, "gone");
        assert!(store.is_empty());
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let mut store = BindingStore::new();
        let start = store.revision();
        let id = store.add(cc_binding(1, "a"));
        store.set_enabled(id, false).unwrap();
        assert_eq!(store.revision(), start + 2);
    }

    #[test]
    fn test_load_failure_leaves_store_untouched() {
        let mut store = BindingStore::new();
        store.add(cc_binding(1, "keep"));
        let before = store.revision();

        let result = store.load("{ nope".as_bytes(), DocumentFormat::Json);
        assert!(matches!(result, Err(Error::Format(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.revision(), before);
    }

    #[test]
    fn test_ids_continue_after_load() {
        let mut store = BindingStore::new();
        let doc = r#"{"version": 1, "bindings": [{"id": 7, "kind": "cc", "action_ref": "a"}]}"#;
        assert_eq!(store.load(doc.as_bytes(), DocumentFormat::Json).unwrap(), 1);
        let id = store.add(cc_binding(1, "b"));
        assert_eq!(id, BindingId::from_raw(8));
    }

    #[test]
    fn test_ids_after_max_id_reuse_lowest_free() {
        let mut store = BindingStore::new();
        let doc = r#"{"version": 1, "bindings": [
            {"id": 1, "kind": "cc", "action_ref": "a"},
            {"id": 18446744073709551615, "kind": "cc", "action_ref": "b"}
        ]}"#;
        assert_eq!(store.load(doc.as_bytes(), DocumentFormat::Json).unwrap(), 2);

        let first = store.add(cc_binding(1, "c"));
        let second = store.add(cc_binding(1, "d"));
        assert_eq!(first, BindingId::from_raw(2));
        assert_eq!(second, BindingId::from_raw(3));
        assert!(store.get(BindingId::from_raw(u64::MAX)).is_some());
    }

    #[test]
    fn test_save_and_load_path_roundtrip() {
        let dir = TempDir::new().unwrap();
        for name in ["mappings.json", "mappings.yaml"] {
            let path = dir.path().join(name);

            let mut store = BindingStore::new();
            store.add(
                cc_binding(7, "/Game/Light.Intensity")
                    .on_channel(0)
                    .with_transform(Transform::linear(0.5, 0.25).with_clamp(0.0, 1.0)),
            );
            store.add(Binding::new(EventKind::NoteOn, "pad").note_off_as_zero_velocity().disabled());
            store.save_path(&path).unwrap();

            let mut loaded = BindingStore::new();
            assert_eq!(loaded.load_path(&path).unwrap(), 2);
            let original: Vec<_> = store.iter().cloned().collect();
            let restored: Vec<_> = loaded.iter().cloned().collect();
            assert_eq!(original, restored, "{}", name);
        }
    }

    #[test]
    fn test_synced_after_own_save_until_file_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");

        let mut store = BindingStore::new();
        assert!(!store.is_synced_with(&path));
        store.add(cc_binding(1, "a"));
        store.save_path(&path).unwrap();
        assert!(store.is_synced_with(&path));

        std::fs::write(&path, r#"{"version": 1, "bindings": []}"#).unwrap();
        assert!(!store.is_synced_with(&path));
        store.load_path(&path).unwrap();
        assert!(store.is_synced_with(&path));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let mut store = BindingStore::new();
        let result = store.load_path(dir.path().join("absent.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
