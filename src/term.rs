//! The term graph deserialized from a pickle. Nodes live in a `Graph` arena and refer to
//! each other by `TermRef` handle, so shared and cyclic structure costs nothing special:
//! two fields holding the same handle *are* the same node, and any traversal detects a
//! revisit with a `HashSet<TermRef>`.

use std::fmt::{Display, Formatter};
use std::ops::Index;

use string_cache::DefaultAtom;
use uuid::Uuid;

/// A stable handle into a `Graph`. Handles are only meaningful for the graph that
/// produced them.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TermRef(u32);

impl TermRef {
  pub(crate) fn new(index: usize) -> TermRef {
    TermRef(index as u32)
  }

  /// Converts the handle to an index into the node arena.
  pub fn idx(self) -> usize {
    self.0 as usize
  }
}

impl Display for TermRef {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A compiled procedure body: instruction words, register metadata, and the constant
/// pool its instructions index into.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeArea {
  pub id         : Uuid,
  /// Raw instruction stream, two bytes per word, big-endian.
  pub code       : Vec<u8>,
  pub arity      : u32,
  /// Total count of argument/temp registers, including the formals.
  pub xcount     : u32,
  pub name       : String,
  pub debug_data : TermRef,
  pub constants  : Vec<TermRef>,
}

/// Every node kind the pickle format can encode. Records appear only in normalized
/// form: the deserializer pairs features with values before a `Term` is ever handed
/// out.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
  Int(i64),
  Float(f64),
  Bool(bool),
  Unit,
  Atom(DefaultAtom),
  Cons {
    head: TermRef,
    tail: TermRef
  },
  Tuple {
    label: TermRef,
    items: Vec<TermRef>
  },
  /// A record shape: label plus ordered feature list. Consumed during record
  /// normalization but also a first-class pool constant (send-message arities).
  Arity {
    label: TermRef,
    features: Vec<TermRef>
  },
  Record {
    label: TermRef,
    fields: Vec<(TermRef, TermRef)>
  },
  Builtin {
    module: DefaultAtom,
    name: DefaultAtom
  },
  CodeArea(CodeArea),
  /// Matches anything, binds nothing.
  Wildcard,
  /// Matches anything, binds capture slot `n`.
  Capture(u32),
  Conjunction(Vec<TermRef>),
  OpenRecordPattern {
    label: TermRef,
    fields: Vec<(TermRef, TermRef)>
  },
  Abstraction {
    id: Uuid,
    code_area: TermRef,
    captures: Vec<TermRef>
  },
  Chunk(TermRef),
  UniqueName(DefaultAtom),
  Name(Uuid),
  NamedName {
    id: Uuid,
    name: DefaultAtom
  },
  String(String),
}

impl Term {
  /// Child handles in declaration order. Leaves yield nothing.
  pub fn children(&self) -> Vec<TermRef> {
    match self {
      Term::Cons { head, tail } => vec![*head, *tail],

      | Term::Tuple { label, items }
      | Term::Arity { label, features: items } => {
        let mut refs = vec![*label];
        refs.extend_from_slice(items);
        refs
      }

      | Term::Record { label, fields }
      | Term::OpenRecordPattern { label, fields } => {
        let mut refs = vec![*label];
        for (feature, value) in fields {
          refs.push(*feature);
          refs.push(*value);
        }
        refs
      }

      Term::CodeArea(area) => {
        let mut refs = vec![area.debug_data];
        refs.extend_from_slice(&area.constants);
        refs
      }

      Term::Conjunction(items) => items.clone(),

      Term::Abstraction { code_area, captures, .. } => {
        let mut refs = vec![*code_area];
        refs.extend_from_slice(captures);
        refs
      }

      Term::Chunk(inner) => vec![*inner],

      _leaf => vec![]
    }
  }
}

/// The arena holding one resolved pickle. Immutable once built; freely shared.
#[derive(Clone, Debug)]
pub struct Graph {
  pub(crate) nodes: Vec<Term>,
  pub(crate) root: TermRef,
}

impl Graph {
  /// The document root the pickle designated.
  pub fn root(&self) -> TermRef {
    self.root
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }
}

impl Index<TermRef> for Graph {
  type Output = Term;

  fn index(&self, handle: TermRef) -> &Term {
    &self.nodes[handle.idx()]
  }
}
