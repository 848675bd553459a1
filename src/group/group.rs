// mailbase-lib, a Rust library for local mail storage and indexing.
// Copyright (C) 2022  soywod <clement.douin@posteo.net>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! View group module.
//!
//! A view group keeps the members of its result view equal to a set
//! expression over a base view and operand views. Groups never touch
//! views themselves: they read the members of their sources and return
//! the [`Effect`]s the registry has to apply on the result.

use log::{debug, trace};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    result,
};
use thiserror::Error;

use crate::{
    message,
    view::{RangeTable, View, ViewId, ViewKind},
    MessageId, OrderedIdSet,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot add view {1} to group {0}: it would create a cycle")]
    CycleError(ViewId, ViewId),
    #[error("cannot use view {0} as base of a {1:?} group")]
    MissingBaseError(ViewId, GroupKind),
    #[error("cannot find group {0}")]
    FindGroupError(ViewId),

    #[error(transparent)]
    MessageError(#[from] message::Error),
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum GroupKind {
    Union,
    Intersection,
    Complement,
}

impl GroupKind {
    /// Gets the kind of the result view of such a group.
    pub fn view_kind(self) -> ViewKind {
        match self {
            Self::Union => ViewKind::UnionGroup,
            Self::Intersection => ViewKind::IntersectionGroup,
            Self::Complement => ViewKind::ComplementGroup,
        }
    }
}

/// Represents a change the registry has to apply on a result view.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Effect {
    Add(ViewId, MessageId),
    Remove(ViewId, MessageId),
}

/// Gives read access to the members of views.
pub trait Members {
    fn members_of(&self, id: ViewId) -> Option<&OrderedIdSet>;

    fn view_contains(&self, view: ViewId, id: MessageId) -> bool {
        self.members_of(view)
            .map(|members| members.contains(id))
            .unwrap_or(false)
    }
}

impl Members for RangeTable<View> {
    fn members_of(&self, id: ViewId) -> Option<&OrderedIdSet> {
        self.get(id).map(View::members)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ViewGroup {
    kind: GroupKind,
    result: ViewId,
    /// Represents the base view, 0 for a union without base.
    base: ViewId,
    operands: Vec<ViewId>,
}

impl ViewGroup {
    pub fn new(kind: GroupKind, result: ViewId, base: ViewId) -> Result<Self> {
        if base == 0 && kind != GroupKind::Union {
            return Err(Error::MissingBaseError(base, kind));
        }
        if base != 0 && base == result {
            return Err(Error::CycleError(result, base));
        }

        Ok(Self {
            kind,
            result,
            base,
            operands: vec![],
        })
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn result(&self) -> ViewId {
        self.result
    }

    pub fn base(&self) -> ViewId {
        self.base
    }

    pub fn operands(&self) -> &[ViewId] {
        &self.operands
    }

    /// Lists the base and the operands.
    pub fn sources(&self) -> impl Iterator<Item = ViewId> + '_ {
        (self.base != 0)
            .then_some(self.base)
            .into_iter()
            .chain(self.operands.iter().copied())
    }

    pub fn observes(&self, source: ViewId) -> bool {
        (self.base != 0 && source == self.base) || self.operands.contains(&source)
    }

    fn in_any_operand<M: Members>(&self, views: &M, id: MessageId, except: ViewId) -> bool {
        self.operands
            .iter()
            .any(|operand| *operand != except && views.view_contains(*operand, id))
    }

    fn in_every_operand<M: Members>(&self, views: &M, id: MessageId) -> bool {
        self.operands
            .iter()
            .all(|operand| views.view_contains(*operand, id))
    }

    /// Reacts to a message added to one of the sources. The source
    /// already contains the message.
    pub fn message_added<M: Members>(
        &self,
        views: &M,
        source: ViewId,
        id: MessageId,
    ) -> Option<Effect> {
        if !self.observes(source) {
            return None;
        }

        let in_result = views.view_contains(self.result, id);
        let effect = match self.kind {
            GroupKind::Union => (!in_result).then_some(Effect::Add(self.result, id)),
            GroupKind::Intersection => (!in_result
                && views.view_contains(self.base, id)
                && self.in_every_operand(views, id))
            .then_some(Effect::Add(self.result, id)),
            GroupKind::Complement if source == self.base => (!in_result
                && !self.in_any_operand(views, id, 0))
            .then_some(Effect::Add(self.result, id)),
            GroupKind::Complement => in_result.then_some(Effect::Remove(self.result, id)),
        };

        trace!(
            "group {} got message {} added to {}: {:?}",
            self.result,
            id,
            source,
            effect
        );
        effect
    }

    /// Reacts to a message removed from one of the sources. The
    /// source does not contain the message anymore.
    pub fn message_removed<M: Members>(
        &self,
        views: &M,
        source: ViewId,
        id: MessageId,
    ) -> Option<Effect> {
        if !self.observes(source) {
            return None;
        }

        let in_result = views.view_contains(self.result, id);
        let effect = match self.kind {
            GroupKind::Union => {
                let elsewhere = (self.base != 0
                    && self.base != source
                    && views.view_contains(self.base, id))
                    || self.in_any_operand(views, id, source);
                (in_result && !elsewhere).then_some(Effect::Remove(self.result, id))
            }
            GroupKind::Intersection => in_result.then_some(Effect::Remove(self.result, id)),
            GroupKind::Complement if source == self.base => {
                in_result.then_some(Effect::Remove(self.result, id))
            }
            GroupKind::Complement => (!in_result
                && views.view_contains(self.base, id)
                && !self.in_any_operand(views, id, source))
            .then_some(Effect::Add(self.result, id)),
        };

        trace!(
            "group {} got message {} removed from {}: {:?}",
            self.result,
            id,
            source,
            effect
        );
        effect
    }

    /// Adds an operand and reconciles the current result with it.
    /// Only the messages affected by the new operand are touched.
    pub fn add_operand<M: Members>(&mut self, views: &M, operand: ViewId) -> Result<Vec<Effect>> {
        if operand == self.result || operand == 0 {
            return Err(Error::CycleError(self.result, operand));
        }
        if self.observes(operand) {
            return Ok(vec![]);
        }
        self.operands.push(operand);

        let empty = OrderedIdSet::new();
        let members = views.members_of(operand).unwrap_or(&empty);
        let result = views.members_of(self.result).unwrap_or(&empty);

        let effects: Vec<Effect> = match self.kind {
            GroupKind::Union => members
                .iter()
                .filter(|id| !result.contains(*id))
                .map(|id| Effect::Add(self.result, id))
                .collect(),
            GroupKind::Intersection => result
                .iter()
                .filter(|id| !members.contains(*id))
                .map(|id| Effect::Remove(self.result, id))
                .collect(),
            GroupKind::Complement => {
                let (outer, inner) = if members.len() < result.len() {
                    (members, result)
                } else {
                    (result, members)
                };
                outer
                    .iter()
                    .filter(|id| inner.contains(*id))
                    .map(|id| Effect::Remove(self.result, id))
                    .collect()
            }
        };

        debug!(
            "view {} added to group {}, reconciled with {} changes",
            operand,
            self.result,
            effects.len()
        );
        Ok(effects)
    }

    /// Removes an operand and reconciles the current result without
    /// it.
    pub fn remove_operand<M: Members>(&mut self, views: &M, operand: ViewId) -> Vec<Effect> {
        let len = self.operands.len();
        self.operands.retain(|id| *id != operand);
        if self.operands.len() == len {
            return vec![];
        }

        let empty = OrderedIdSet::new();
        let result = views.members_of(self.result).unwrap_or(&empty);

        let effects: Vec<Effect> = match self.kind {
            GroupKind::Union => views
                .members_of(operand)
                .unwrap_or(&empty)
                .iter()
                .filter(|id| result.contains(*id))
                .filter(|id| {
                    !(self.base != 0 && views.view_contains(self.base, *id))
                        && !self.in_any_operand(views, *id, 0)
                })
                .map(|id| Effect::Remove(self.result, id))
                .collect(),
            GroupKind::Intersection => views
                .members_of(self.base)
                .unwrap_or(&empty)
                .iter()
                .filter(|id| !result.contains(*id) && self.in_every_operand(views, *id))
                .map(|id| Effect::Add(self.result, id))
                .collect(),
            GroupKind::Complement => views
                .members_of(self.base)
                .unwrap_or(&empty)
                .iter()
                .filter(|id| !result.contains(*id) && !self.in_any_operand(views, *id, 0))
                .map(|id| Effect::Add(self.result, id))
                .collect(),
        };

        debug!(
            "view {} removed from group {}, reconciled with {} changes",
            operand,
            self.result,
            effects.len()
        );
        effects
    }

    /// Computes the result from scratch.
    pub fn compute<M: Members>(&self, views: &M) -> Result<OrderedIdSet> {
        let empty = OrderedIdSet::new();
        let mut result = OrderedIdSet::new();

        match self.kind {
            GroupKind::Union => {
                for source in self.sources() {
                    for id in views.members_of(source).unwrap_or(&empty) {
                        result.insert(id)?;
                    }
                }
            }
            GroupKind::Intersection => {
                for id in views.members_of(self.base).unwrap_or(&empty) {
                    if self.in_every_operand(views, id) {
                        result.insert(id)?;
                    }
                }
            }
            GroupKind::Complement => {
                for id in views.members_of(self.base).unwrap_or(&empty) {
                    if !self.in_any_operand(views, id, 0) {
                        result.insert(id)?;
                    }
                }
            }
        }

        Ok(result)
    }

    /// Diffs the current result against a full computation.
    pub fn rebuild<M: Members>(&self, views: &M) -> Result<Vec<Effect>> {
        let expected = self.compute(views)?;
        let empty = OrderedIdSet::new();
        let current = views.members_of(self.result).unwrap_or(&empty);

        let mut effects: Vec<Effect> = current
            .iter()
            .filter(|id| !expected.contains(*id))
            .map(|id| Effect::Remove(self.result, id))
            .collect();
        effects.extend(
            expected
                .iter()
                .filter(|id| !current.contains(*id))
                .map(|id| Effect::Add(self.result, id)),
        );

        Ok(effects)
    }
}

/// Represents every group of the registry, keyed by result view.
#[derive(Debug, Default)]
pub struct Groups {
    groups: HashMap<ViewId, ViewGroup>,
    observers: HashMap<ViewId, Vec<ViewId>>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, result: ViewId) -> Option<&ViewGroup> {
        self.groups.get(&result)
    }

    pub fn contains(&self, result: ViewId) -> bool {
        self.groups.contains_key(&result)
    }

    pub fn results(&self) -> Vec<ViewId> {
        let mut results: Vec<ViewId> = self.groups.keys().copied().collect();
        results.sort_unstable();
        results
    }

    fn observe(&mut self, source: ViewId, result: ViewId) {
        let observers = self.observers.entry(source).or_default();
        if !observers.contains(&result) {
            observers.push(result);
        }
    }

    fn unobserve(&mut self, source: ViewId, result: ViewId) {
        if let Some(observers) = self.observers.get_mut(&source) {
            observers.retain(|id| *id != result);
            if observers.is_empty() {
                self.observers.remove(&source);
            }
        }
    }

    pub fn insert(&mut self, group: ViewGroup) {
        let result = group.result();
        for source in group.sources() {
            self.observe(source, result);
        }
        self.groups.insert(result, group);
    }

    pub fn remove(&mut self, result: ViewId) -> Option<ViewGroup> {
        let group = self.groups.remove(&result)?;
        for source in group.sources() {
            self.unobserve(source, result);
        }
        Some(group)
    }

    /// Lists the groups observing the given view, in creation order.
    pub fn observers_of(&self, source: ViewId) -> Vec<ViewId> {
        self.observers.get(&source).cloned().unwrap_or_default()
    }

    /// Checks if the result of a group depends on a view, directly or
    /// through other groups.
    pub fn depends_on(&self, result: ViewId, view: ViewId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![result];
        while let Some(current) = stack.pop() {
            if current == view {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(group) = self.groups.get(&current) {
                stack.extend(group.sources());
            }
        }
        false
    }

    /// Adds an operand to a group, rejecting cycles.
    pub fn add_operand<M: Members>(
        &mut self,
        views: &M,
        result: ViewId,
        operand: ViewId,
    ) -> Result<Vec<Effect>> {
        if self.depends_on(operand, result) {
            return Err(Error::CycleError(result, operand));
        }

        let group = self
            .groups
            .get_mut(&result)
            .ok_or(Error::FindGroupError(result))?;
        let effects = group.add_operand(views, operand)?;
        self.observe(operand, result);
        Ok(effects)
    }

    pub fn remove_operand<M: Members>(
        &mut self,
        views: &M,
        result: ViewId,
        operand: ViewId,
    ) -> Result<Vec<Effect>> {
        let group = self
            .groups
            .get_mut(&result)
            .ok_or(Error::FindGroupError(result))?;
        let effects = group.remove_operand(views, operand);
        if !group.observes(operand) {
            self.unobserve(operand, result);
        }
        Ok(effects)
    }
}
