/*!
  The graph deserializer. A pickle is a flat node table: a node count, a root index, then
  `(index, tag, payload)` entries terminated by a non-positive index. Payloads refer to
  other nodes by 1-based table index; those references become `TermRef` handles the moment
  they are read, so sharing and cycles fall out of the arena representation for free.

  After the table is populated a resolution pass runs: every declared slot must have been
  defined, and pre-normalized records are rewritten in place against their `Arity` node,
  pairing features with values. Only then is the `Graph` handed out.
*/

use std::convert::TryFrom;

use nom::bytes::complete::take;
use nom::error::ErrorKind;
use nom::number::complete::{be_i32, be_u32, be_u8};
use nom::IResult;
use num_enum::TryFromPrimitive;
use string_cache::DefaultAtom;
use uuid::Uuid;

use crate::error::FormatError;
use crate::term::{CodeArea, Graph, Term, TermRef};

type NomError<'a> = (&'a [u8], ErrorKind);

/// The fixed type catalog. Tag bytes in the stream are 1-based indices into this table.
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive)]
#[repr(u8)]
enum TypeTag {
  Int = 1,
  Float,
  Bool,
  Unit,
  Atom,
  Cons,
  Tuple,
  Arity,
  Record,
  Builtin,
  CodeArea,
  PatMatWildcard,
  PatMatCapture,
  PatMatConjunction,
  PatMatOpenRecord,
  Abstraction,
  Chunk,
  UniqueName,
  Name,
  NamedName,
  UnicodeString,
}

/// Table slot state during deserialization. `PreRecord` is the raw
/// "arity reference + separate values" form of a record; it never escapes this module.
#[derive(Clone, Debug)]
enum Node {
  Vacant,
  Ready(Term),
  PreRecord {
    arity: TermRef,
    values: Vec<TermRef>,
    open: bool
  },
}

/// Parses and resolves one pickle. The whole input must already be in memory.
pub fn parse(data: &[u8]) -> Result<Graph, FormatError> {
  Unpickler::new(data).unpickle()
}

struct Unpickler<'a> {
  data: &'a [u8],
  rest: &'a [u8],
  /// Declared node count; references are validated against it as they are read.
  node_count: usize,
}

impl<'a> Unpickler<'a> {
  fn new(data: &'a [u8]) -> Unpickler<'a> {
    Unpickler {
      data,
      rest: data,
      node_count: 0
    }
  }

  // region Primitive readers

  /// Byte offset of the read cursor, for error context.
  fn offset(&self) -> usize {
    self.data.len() - self.rest.len()
  }

  /// Runs a nom parser at the cursor, advancing past what it consumed. Any parse
  /// failure at this level means the stream ended early.
  fn run<T, P>(&mut self, parser: P) -> Result<T, FormatError>
    where P: Fn(&'a [u8]) -> IResult<&'a [u8], T, NomError<'a>>
  {
    match parser(self.rest) {
      Ok((rest, value)) => {
        self.rest = rest;
        Ok(value)
      }
      Err(_) => Err(FormatError::Truncated { offset: self.offset() })
    }
  }

  fn int(&mut self) -> Result<i32, FormatError> {
    self.run(be_i32)
  }

  fn uint(&mut self) -> Result<u32, FormatError> {
    self.run(be_u32)
  }

  fn byte(&mut self) -> Result<u8, FormatError> {
    self.run(be_u8)
  }

  fn bytes(&mut self, count: usize) -> Result<&'a [u8], FormatError> {
    self.run(take(count))
  }

  /// Length-prefixed UTF-8 text.
  fn string(&mut self) -> Result<String, FormatError> {
    let start = self.offset();
    let length = self.uint()? as usize;
    let raw = self.bytes(length)?;
    match std::str::from_utf8(raw) {
      Ok(text) => Ok(text.to_owned()),
      Err(_) => Err(FormatError::BadString { offset: start })
    }
  }

  /// A 1-based node reference, turned into an arena handle immediately. Out-of-range
  /// indices are rejected here, before any slot is touched.
  fn reference(&mut self) -> Result<TermRef, FormatError> {
    let start = self.offset();
    let index = self.int()?;
    if index < 1 || index as usize > self.node_count {
      return Err(FormatError::ReferenceOutOfRange {
        index,
        count: self.node_count,
        offset: start
      });
    }
    Ok(TermRef::new(index as usize - 1))
  }

  fn reference_list(&mut self) -> Result<Vec<TermRef>, FormatError> {
    let count = self.uint()? as usize;
    let mut refs = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
      refs.push(self.reference()?);
    }
    Ok(refs)
  }

  fn identity(&mut self) -> Result<Uuid, FormatError> {
    let raw = self.bytes(16)?;
    let mut token = [0u8; 16];
    token.copy_from_slice(raw);
    Ok(Uuid::from_bytes(token))
  }

  /// Numeric literal text with the `~` sign marker replaced by a minus sign.
  fn number_text(&mut self) -> Result<(String, usize), FormatError> {
    let start = self.offset();
    Ok((self.string()?.replace('~', "-"), start))
  }

  fn oz_int(&mut self) -> Result<i64, FormatError> {
    let (text, offset) = self.number_text()?;
    text.parse::<i64>().map_err(|_| FormatError::BadNumber { text, offset })
  }

  fn oz_float(&mut self) -> Result<f64, FormatError> {
    let (text, offset) = self.number_text()?;
    text.parse::<f64>().map_err(|_| FormatError::BadNumber { text, offset })
  }

  // endregion

  // region Tagged payload readers

  fn node(&mut self, tag: TypeTag) -> Result<Node, FormatError> {
    let term = match tag {
      TypeTag::Int => Term::Int(self.oz_int()?),

      TypeTag::Float => Term::Float(self.oz_float()?),

      TypeTag::Bool => Term::Bool(self.byte()? != 0),

      TypeTag::Unit => Term::Unit,

      TypeTag::Atom => Term::Atom(DefaultAtom::from(self.string()?.as_str())),

      TypeTag::Cons => {
        let head = self.reference()?;
        let tail = self.reference()?;
        Term::Cons { head, tail }
      }

      TypeTag::Tuple => {
        let label = self.reference()?;
        let items = self.reference_list()?;
        Term::Tuple { label, items }
      }

      TypeTag::Arity => {
        let label = self.reference()?;
        let features = self.reference_list()?;
        Term::Arity { label, features }
      }

      TypeTag::Record => {
        let arity = self.reference()?;
        let values = self.reference_list()?;
        return Ok(Node::PreRecord { arity, values, open: false });
      }

      TypeTag::Builtin => {
        let module = self.string()?;
        let name = self.string()?;
        Term::Builtin {
          module: DefaultAtom::from(module.as_str()),
          name: DefaultAtom::from(name.as_str())
        }
      }

      TypeTag::CodeArea => {
        let id = self.identity()?;
        let code_size = self.uint()? as usize;
        let code = self.bytes(code_size * 2)?.to_vec();
        let arity = self.uint()?;
        let xcount = self.uint()?;
        let name = self.string()?;
        let debug_data = self.reference()?;
        let constants = self.reference_list()?;
        Term::CodeArea(CodeArea {
          id,
          code,
          arity,
          xcount,
          name,
          debug_data,
          constants
        })
      }

      TypeTag::PatMatWildcard => Term::Wildcard,

      TypeTag::PatMatCapture => Term::Capture(self.uint()?),

      TypeTag::PatMatConjunction => Term::Conjunction(self.reference_list()?),

      TypeTag::PatMatOpenRecord => {
        let arity = self.reference()?;
        let values = self.reference_list()?;
        return Ok(Node::PreRecord { arity, values, open: true });
      }

      TypeTag::Abstraction => {
        let id = self.identity()?;
        let code_area = self.reference()?;
        let captures = self.reference_list()?;
        Term::Abstraction { id, code_area, captures }
      }

      TypeTag::Chunk => Term::Chunk(self.reference()?),

      TypeTag::UniqueName => Term::UniqueName(DefaultAtom::from(self.string()?.as_str())),

      TypeTag::Name => Term::Name(self.identity()?),

      TypeTag::NamedName => {
        let id = self.identity()?;
        let name = self.string()?;
        Term::NamedName { id, name: DefaultAtom::from(name.as_str()) }
      }

      TypeTag::UnicodeString => Term::String(self.string()?),
    };

    Ok(Node::Ready(term))
  }

  // endregion

  fn unpickle(mut self) -> Result<Graph, FormatError> {
    let declared = self.int()?;
    if declared < 0 {
      return Err(FormatError::InvalidNodeCount { count: declared });
    }
    self.node_count = declared as usize;

    let root = self.reference()?;

    let mut nodes: Vec<Node> = vec![Node::Vacant; self.node_count];
    loop {
      let index = self.int()?;
      if index <= 0 {
        break;
      }
      let start = self.offset();
      if index as usize > self.node_count {
        return Err(FormatError::ReferenceOutOfRange {
          index,
          count: self.node_count,
          offset: start
        });
      }
      let tag_byte = self.byte()?;
      let tag = TypeTag::try_from(tag_byte)
        .map_err(|_| FormatError::UnknownTypeTag { tag: tag_byte, offset: start })?;
      nodes[index as usize - 1] = self.node(tag)?;
    }

    resolve(nodes, root)
  }
}

/// The resolution pass: rejects undefined slots and normalizes pre-normalized records
/// in place. Reference validity was already established at read time, so no recursion
/// and no memoization is needed; cyclic structure is just handles pointing backwards.
fn resolve(mut nodes: Vec<Node>, root: TermRef) -> Result<Graph, FormatError> {
  let mut normalized: Vec<(usize, Term)> = Vec::new();

  for (index, node) in nodes.iter().enumerate() {
    if let Node::PreRecord { arity, values, open } = node {
      let (label, features) = match &nodes[arity.idx()] {
        Node::Ready(Term::Arity { label, features }) => (*label, features.clone()),
        _ => return Err(FormatError::NotAnArity { index: arity.idx() + 1 })
      };
      if features.len() != values.len() {
        return Err(FormatError::RecordArityMismatch {
          features: features.len(),
          values: values.len()
        });
      }
      let fields: Vec<(TermRef, TermRef)> =
        features.into_iter().zip(values.iter().copied()).collect();
      let term = match open {
        false => Term::Record { label, fields },
        true => Term::OpenRecordPattern { label, fields }
      };
      normalized.push((index, term));
    }
  }

  for (index, term) in normalized {
    nodes[index] = Node::Ready(term);
  }

  let nodes = nodes
    .into_iter()
    .enumerate()
    .map(|(index, node)| match node {
      Node::Ready(term) => Ok(term),
      _ => Err(FormatError::MissingNode { index: index + 1 })
    })
    .collect::<Result<Vec<Term>, FormatError>>()?;

  Ok(Graph { nodes, root })
}

/// Byte-level pickle construction for tests. Indices are 1-based, as on disk.
#[cfg(test)]
pub(crate) mod build {
  pub struct PickleBuilder {
    buffer: Vec<u8>,
  }

  impl PickleBuilder {
    pub fn new(node_count: i32, root: i32) -> PickleBuilder {
      let mut builder = PickleBuilder { buffer: vec![] };
      builder.int(node_count);
      builder.int(root);
      builder
    }

    fn int(&mut self, value: i32) {
      self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    fn uint(&mut self, value: u32) {
      self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    fn text(&mut self, value: &str) {
      self.uint(value.len() as u32);
      self.buffer.extend_from_slice(value.as_bytes());
    }

    fn refs(&mut self, targets: &[i32]) {
      self.uint(targets.len() as u32);
      for target in targets {
        self.int(*target);
      }
    }

    fn entry(&mut self, index: i32, tag: u8) {
      self.int(index);
      self.buffer.push(tag);
    }

    pub fn int_node(&mut self, index: i32, digits: &str) -> &mut Self {
      self.entry(index, 1);
      self.text(digits);
      self
    }

    pub fn float_node(&mut self, index: i32, digits: &str) -> &mut Self {
      self.entry(index, 2);
      self.text(digits);
      self
    }

    pub fn bool_node(&mut self, index: i32, value: bool) -> &mut Self {
      self.entry(index, 3);
      self.buffer.push(value as u8);
      self
    }

    pub fn unit(&mut self, index: i32) -> &mut Self {
      self.entry(index, 4);
      self
    }

    pub fn atom(&mut self, index: i32, text: &str) -> &mut Self {
      self.entry(index, 5);
      self.text(text);
      self
    }

    pub fn cons(&mut self, index: i32, head: i32, tail: i32) -> &mut Self {
      self.entry(index, 6);
      self.int(head);
      self.int(tail);
      self
    }

    pub fn tuple(&mut self, index: i32, label: i32, items: &[i32]) -> &mut Self {
      self.entry(index, 7);
      self.int(label);
      self.refs(items);
      self
    }

    pub fn arity(&mut self, index: i32, label: i32, features: &[i32]) -> &mut Self {
      self.entry(index, 8);
      self.int(label);
      self.refs(features);
      self
    }

    pub fn record(&mut self, index: i32, arity: i32, values: &[i32]) -> &mut Self {
      self.entry(index, 9);
      self.int(arity);
      self.refs(values);
      self
    }

    pub fn code_area(
      &mut self,
      index: i32,
      name: &str,
      arity: u32,
      xcount: u32,
      words: &[u16],
      debug_data: i32,
      constants: &[i32],
    ) -> &mut Self {
      self.entry(index, 11);
      self.buffer.extend_from_slice(&[0u8; 16]);
      self.uint(words.len() as u32);
      for word in words {
        self.buffer.extend_from_slice(&word.to_be_bytes());
      }
      self.uint(arity);
      self.uint(xcount);
      self.text(name);
      self.int(debug_data);
      self.refs(constants);
      self
    }

    pub fn raw_entry(&mut self, index: i32, tag: u8) -> &mut Self {
      self.entry(index, tag);
      self
    }

    pub fn finish(mut self) -> Vec<u8> {
      self.int(0);
      self.buffer
    }
  }
}

#[cfg(test)]
mod tests {
  use super::build::PickleBuilder;
  use super::*;

  #[test]
  fn shared_references_resolve_to_the_same_handle() {
    let mut pickle = PickleBuilder::new(2, 1);
    pickle.cons(1, 2, 2).atom(2, "shared");
    let graph = parse(&pickle.finish()).unwrap();

    match &graph[graph.root()] {
      Term::Cons { head, tail } => {
        assert_eq!(head, tail);
        assert_eq!(graph[*head], Term::Atom(DefaultAtom::from("shared")));
      }
      other => panic!("expected cons, got {:?}", other)
    }
  }

  #[test]
  fn cyclic_cons_terminates_and_points_back_at_itself() {
    let mut pickle = PickleBuilder::new(2, 1);
    pickle.cons(1, 2, 1).atom(2, "x");
    let graph = parse(&pickle.finish()).unwrap();

    match &graph[graph.root()] {
      Term::Cons { tail, .. } => assert_eq!(*tail, graph.root()),
      other => panic!("expected cons, got {:?}", other)
    }
  }

  #[test]
  fn records_normalize_into_feature_value_pairs() {
    let mut pickle = PickleBuilder::new(7, 1);
    pickle
      .record(1, 2, &[6, 7])
      .arity(2, 3, &[4, 5])
      .atom(3, "foo")
      .atom(4, "a")
      .atom(5, "b")
      .int_node(6, "1")
      .int_node(7, "2");
    let graph = parse(&pickle.finish()).unwrap();

    match &graph[graph.root()] {
      Term::Record { label, fields } => {
        assert_eq!(graph[*label], Term::Atom(DefaultAtom::from("foo")));
        assert_eq!(fields.len(), 2);
        assert_eq!(graph[fields[0].0], Term::Atom(DefaultAtom::from("a")));
        assert_eq!(graph[fields[0].1], Term::Int(1));
        assert_eq!(graph[fields[1].0], Term::Atom(DefaultAtom::from("b")));
        assert_eq!(graph[fields[1].1], Term::Int(2));
      }
      other => panic!("expected record, got {:?}", other)
    }
  }

  #[test]
  fn record_arity_mismatch_is_a_format_error() {
    let mut pickle = PickleBuilder::new(6, 1);
    pickle
      .record(1, 2, &[6])
      .arity(2, 3, &[4, 5])
      .atom(3, "foo")
      .atom(4, "a")
      .atom(5, "b")
      .int_node(6, "1");
    let error = parse(&pickle.finish()).unwrap_err();
    assert_eq!(error, FormatError::RecordArityMismatch { features: 2, values: 1 });
  }

  #[test]
  fn sign_marker_decodes_as_negative() {
    let mut pickle = PickleBuilder::new(1, 1);
    pickle.int_node(1, "~5");
    let graph = parse(&pickle.finish()).unwrap();
    assert_eq!(graph[graph.root()], Term::Int(-5));

    let mut pickle = PickleBuilder::new(1, 1);
    pickle.float_node(1, "~2.5");
    let graph = parse(&pickle.finish()).unwrap();
    assert_eq!(graph[graph.root()], Term::Float(-2.5));
  }

  #[test]
  fn unknown_type_tag_is_rejected() {
    let mut pickle = PickleBuilder::new(1, 1);
    pickle.raw_entry(1, 22);
    match parse(&pickle.finish()).unwrap_err() {
      FormatError::UnknownTypeTag { tag: 22, .. } => {}
      other => panic!("unexpected error {:?}", other)
    }
  }

  #[test]
  fn out_of_range_reference_is_rejected() {
    let mut pickle = PickleBuilder::new(2, 1);
    pickle.cons(1, 2, 9).atom(2, "x");
    match parse(&pickle.finish()).unwrap_err() {
      FormatError::ReferenceOutOfRange { index: 9, count: 2, .. } => {}
      other => panic!("unexpected error {:?}", other)
    }
  }

  #[test]
  fn undefined_slot_is_rejected() {
    let mut pickle = PickleBuilder::new(2, 1);
    pickle.cons(1, 2, 2);
    assert_eq!(parse(&pickle.finish()).unwrap_err(), FormatError::MissingNode { index: 2 });
  }

  #[test]
  fn truncated_stream_reports_offset() {
    match parse(&[0, 0, 0]).unwrap_err() {
      FormatError::Truncated { offset: 0 } => {}
      other => panic!("unexpected error {:?}", other)
    }
  }

  #[test]
  fn boolean_payload_is_nonzero_true() {
    let mut pickle = PickleBuilder::new(1, 1);
    pickle.bool_node(1, false);
    let graph = parse(&pickle.finish()).unwrap();
    assert_eq!(graph[graph.root()], Term::Bool(false));
  }
}
