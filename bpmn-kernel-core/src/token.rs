//! Token state and the per-instance token arena.
//!
//! Tokens are never removed: an ended token stays in the arena and in its
//! parent's child list for history. Parent links are plain indices used for
//! lookup only; ownership runs from the instance through `TokenTree`.

use crate::error::KernelError;
use crate::types::{FlowRef, LifecycleEvent, NodeRef, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

/// Token variant. Decides how an ended token notifies its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Root,
    /// Created by a fork; completes its parent through the implicit AND-join.
    Forked,
    /// Runs the contents of a sub-process; resumes its parent when done.
    SubProcessRoot,
}

impl TokenKind {
    pub fn signals_parent(self) -> bool {
        matches!(self, TokenKind::SubProcessRoot)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub name: Option<String>,
    pub kind: TokenKind,
    pub current_node: NodeRef,
    /// Jump target consumed by the next `leave()`.
    pub override_target: Option<NodeRef>,
    pub parent: Option<TokenId>,
    pub children: Vec<TokenId>,
    pub named_children: BTreeMap<String, TokenId>,
    /// Merge a forked token joins its siblings at. `None` joins at the
    /// first converging parallel or inclusive gateway reached.
    #[serde(default)]
    pub join_at: Option<NodeRef>,
    /// Last sequence flow this token took.
    pub incoming_flow: Option<FlowRef>,
    pub active: bool,
    pub ended: bool,
    pub locked: bool,
    pub suspended: bool,
    #[serde(skip)]
    pub(crate) pending_event: Option<LifecycleEvent>,
    #[serde(skip)]
    pub(crate) operating: bool,
}

impl Token {
    pub fn new(
        id: TokenId,
        name: Option<String>,
        kind: TokenKind,
        node: NodeRef,
        parent: Option<TokenId>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            current_node: node,
            override_target: None,
            parent,
            children: Vec::new(),
            named_children: BTreeMap::new(),
            join_at: None,
            incoming_flow: None,
            active: true,
            ended: false,
            locked: false,
            suspended: false,
            pending_event: None,
            operating: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_sub_process_root(&self) -> bool {
        self.kind == TokenKind::SubProcessRoot
    }

    /// Whether the dispatch loop for this token is currently draining.
    pub fn is_operating(&self) -> bool {
        self.operating
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}({name})", self.id),
            None => self.id.to_string(),
        }
    }
}

/// Arena holding every token of one process instance. Index 0 is the root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenTree {
    tokens: Vec<Token>,
}

impl TokenTree {
    pub fn new(start: NodeRef) -> Self {
        Self {
            tokens: vec![Token::new(TokenId::ROOT, None, TokenKind::Root, start, None)],
        }
    }

    pub fn root(&self) -> &Token {
        &self.tokens[0]
    }

    pub fn get(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id.index())
    }

    pub fn get_mut(&mut self, id: TokenId) -> Option<&mut Token> {
        self.tokens.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Token> {
        self.tokens.iter_mut()
    }

    pub fn children(&self, parent: TokenId) -> impl Iterator<Item = &Token> {
        self[parent].children.iter().map(move |c| &self[*c])
    }

    pub fn has_active_children(&self, parent: TokenId) -> bool {
        self.children(parent).any(|c| c.active)
    }

    /// Tokens that are neither ended nor inactive, i.e. still moving.
    pub fn active_tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.active && !t.ended)
    }

    /// Phase one of the child-creation protocol: validate every name, then
    /// register all children under `parent` positioned at `node`.
    ///
    /// A name may be reused once the child that held it has ended. On a
    /// clash with a live child nothing is created and the parent is left
    /// untouched.
    pub fn register_children(
        &mut self,
        parent: TokenId,
        kind: TokenKind,
        node: NodeRef,
        names: &[String],
    ) -> Result<Vec<TokenId>, KernelError> {
        let existing = &self
            .get(parent)
            .ok_or(KernelError::UnknownToken(parent))?
            .named_children;
        for (i, name) in names.iter().enumerate() {
            let live = existing.get(name).is_some_and(|c| !self[*c].ended);
            if live || names[..i].contains(name) {
                return Err(KernelError::DuplicateChild {
                    parent,
                    name: name.clone(),
                });
            }
        }

        let mut created = Vec::with_capacity(names.len());
        for name in names {
            let id = TokenId(self.tokens.len() as u32);
            self.tokens
                .push(Token::new(id, Some(name.clone()), kind, node, Some(parent)));
            let p = &mut self[parent];
            p.children.push(id);
            p.named_children.insert(name.clone(), id);
            created.push(id);
        }
        Ok(created)
    }

    /// Walk up to the token that owns the current scope: the nearest
    /// sub-process root, else the instance root.
    pub fn scope_root(&self, from: TokenId) -> TokenId {
        let mut id = from;
        loop {
            let t = &self[id];
            match t.parent {
                Some(parent) if !t.is_sub_process_root() => id = parent,
                _ => return id,
            }
        }
    }
}

impl Index<TokenId> for TokenTree {
    type Output = Token;

    fn index(&self, id: TokenId) -> &Token {
        &self.tokens[id.index()]
    }
}

impl IndexMut<TokenId> for TokenTree {
    fn index_mut(&mut self, id: TokenId) -> &mut Token {
        &mut self.tokens[id.index()]
    }
}
