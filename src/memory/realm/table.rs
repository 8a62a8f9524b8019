/*!
 * Realm Table
 * Generation-checked slab holding the realm ownership tree
 */

use super::cleanup::CleanupRecord;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::types::{Operation, RealmId};
use crate::memory::traits::Backend;
use crate::memory::types::RealmMemory;
use std::collections::VecDeque;
use std::sync::Arc;

/// Invoked with the error when an allocation on the realm fails for lack of memory
pub type AbortFn = fn(&RealmError);

/// Whatever references a realm in its parent's child list
///
/// Plays the part of the pointer-to-pointer: unlinking rewrites the
/// referencing field without walking the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackLink {
    /// The parent's `first_child`
    Head(RealmId),
    /// The previous sibling's `next_sibling`
    Sibling(RealmId),
}

pub(crate) struct RealmNode {
    pub parent: Option<RealmId>,
    pub first_child: Option<RealmId>,
    pub next_sibling: Option<RealmId>,
    pub back: Option<BackLink>,
    pub accounting: RealmId,
    pub home: Option<RealmMemory>,
    /// Newest first
    pub cleanups: VecDeque<CleanupRecord>,
    pub threads: usize,
    pub abort: Option<AbortFn>,
    pub backend: Arc<dyn Backend>,
}

impl RealmNode {
    pub fn new(
        id: RealmId,
        parent: Option<RealmId>,
        home: Option<RealmMemory>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            parent,
            first_child: None,
            next_sibling: None,
            back: None,
            accounting: id,
            home,
            cleanups: VecDeque::new(),
            threads: 0,
            abort: None,
            backend,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<RealmNode>,
}

#[derive(Default)]
pub(crate) struct RealmTable {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
}

impl RealmTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next `insert` will hand out
    pub fn next_id(&self) -> RealmId {
        match self.vacant.last() {
            Some(&index) => RealmId::new(index, self.slots[index as usize].generation),
            None => RealmId::new(self.slots.len() as u32, 0),
        }
    }

    pub fn insert(&mut self, build: impl FnOnce(RealmId) -> RealmNode) -> RealmId {
        let id = self.next_id();
        let node = build(id);
        match self.vacant.pop() {
            Some(index) => self.slots[index as usize].node = Some(node),
            None => self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            }),
        }
        id
    }

    pub fn contains(&self, id: RealmId) -> bool {
        self.get(id).is_ok()
    }

    pub fn get(&self, id: RealmId) -> RealmResult<&RealmNode> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
            .ok_or(RealmError::InvalidRealm(id))
    }

    pub fn get_mut(&mut self, id: RealmId) -> RealmResult<&mut RealmNode> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
            .ok_or(RealmError::InvalidRealm(id))
    }

    /// Drop an entry; its id goes stale
    pub fn remove(&mut self, id: RealmId) -> RealmResult<RealmNode> {
        self.get(id)?;
        let slot = &mut self.slots[id.index()];
        let node = slot.node.take().ok_or(RealmError::InvalidRealm(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index() as u32);
        Ok(node)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    /// Push `child` in front of `parent`'s children
    pub fn link_child(&mut self, parent: RealmId, child: RealmId) -> RealmResult<()> {
        let displaced = self.get(parent)?.first_child;
        {
            let node = self.get_mut(child)?;
            node.next_sibling = displaced;
            node.back = Some(BackLink::Head(parent));
        }
        if let Some(displaced) = displaced {
            self.get_mut(displaced)?.back = Some(BackLink::Sibling(child));
        }
        self.get_mut(parent)?.first_child = Some(child);
        Ok(())
    }

    /// Remove `id` from its parent's child list in O(1)
    pub fn unlink(&mut self, id: RealmId) -> RealmResult<()> {
        let node = self.get_mut(id)?;
        let (back, next) = (node.back.take(), node.next_sibling.take());
        match back {
            Some(BackLink::Head(parent)) => self.get_mut(parent)?.first_child = next,
            Some(BackLink::Sibling(prev)) => self.get_mut(prev)?.next_sibling = next,
            None => return Ok(()),
        }
        if let Some(next) = next {
            self.get_mut(next)?.back = back;
        }
        Ok(())
    }

    /// Children, most recently created first
    pub fn children(&self, id: RealmId) -> RealmResult<Vec<RealmId>> {
        let mut children = Vec::new();
        let mut cursor = self.get(id)?.first_child;
        while let Some(child) = cursor {
            children.push(child);
            cursor = self.get(child)?.next_sibling;
        }
        Ok(children)
    }

    /// Every realm below `id`, parents before their children
    pub fn descendants(&self, id: RealmId) -> RealmResult<Vec<RealmId>> {
        let mut found = Vec::new();
        let mut pending = self.children(id)?;
        while let Some(next) = pending.pop() {
            found.push(next);
            pending.extend(self.children(next)?);
        }
        Ok(found)
    }

    /// Drop every realm below `id` and clear its child list
    pub fn remove_descendants(&mut self, id: RealmId) -> RealmResult<Vec<RealmNode>> {
        let mut removed = Vec::new();
        for descendant in self.descendants(id)? {
            removed.push(self.remove(descendant)?);
        }
        self.get_mut(id)?.first_child = None;
        Ok(removed)
    }

    /// Whether `ancestor` is `id` or lies on `id`'s parent chain
    pub fn is_ancestor(&self, ancestor: RealmId, id: RealmId) -> RealmResult<bool> {
        self.get(ancestor)?;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return Ok(true);
            }
            cursor = self.get(current)?.parent;
        }
        Ok(false)
    }

    /// Whether `id` or one of its ancestors can be reset
    pub fn has_tracking_ancestor(&self, id: RealmId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Ok(node) = self.get(current) else {
                return false;
            };
            if node.backend.supports(Operation::Reset) {
                return true;
            }
            cursor = node.parent;
        }
        false
    }
}
