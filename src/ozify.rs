/*!
  Renders terms and instructions as Oz surface syntax. Term rendering walks the graph
  with a per-call visited set, printing `...` at any handle it has already rendered,
  so shared and cyclic structure always terminates. Scalars (integers, floats,
  booleans, atoms, strings) are never tracked; only structured nodes are.

  Negative numbers print with the Oz `~` sign. Atoms print bare when they match
  `[a-z][a-zA-Z0-9_]*` and are not reserved words; otherwise they are single-quoted
  with `'` and `\` backslash-escaped.
*/

use std::collections::HashSet;

use crate::bytecode::{Instruction, Operand};
use crate::term::{Graph, Term, TermRef};

lazy_static! {
  static ref KEYWORDS: HashSet<&'static str> = {
    [
      "andthen", "at", "attr", "case", "catch", "choice", "class", "cond", "declare",
      "define", "dis", "div", "else", "elsecase", "elseif", "end", "export", "fail",
      "false", "feat", "finally", "for", "from", "fun", "functor", "if", "import",
      "in", "local", "lock", "meth", "mod", "not", "of", "or", "orelse", "prepare",
      "proc", "prop", "raise", "require", "self", "skip", "then", "thread", "true",
      "try", "unit",
    ]
    .iter()
    .copied()
    .collect()
  };
}

// region Scalar rendering

fn atom_is_bare(text: &str) -> bool {
  if KEYWORDS.contains(text) {
    return false;
  }
  let mut chars = text.chars();
  match chars.next() {
    Some(first) if first.is_ascii_lowercase() => {}
    _ => return false
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bare when it scans as an identifier, single-quoted with escapes otherwise.
pub fn atom_text(text: &str) -> String {
  if atom_is_bare(text) {
    return text.to_string();
  }
  let mut quoted = String::with_capacity(text.len() + 2);
  quoted.push('\'');
  for c in text.chars() {
    if c == '\'' || c == '\\' {
      quoted.push('\\');
    }
    quoted.push(c);
  }
  quoted.push('\'');
  quoted
}

fn int_text(value: i64) -> String {
  value.to_string().replace('-', "~")
}

fn float_text(value: f64) -> String {
  let mut text = value.to_string();
  // Oz floats always carry a fractional part.
  if !text.contains('.') && !text.contains('e') && !text.contains("inf") && !text.contains("NaN")
  {
    text.push_str(".0");
  }
  text.replace('-', "~")
}

// endregion

/// Structured nodes participate in cycle tracking and get parenthesized inside
/// `#`-joined tuples; scalar leaves do neither.
fn is_structured(term: &Term) -> bool {
  !matches!(
    term,
    Term::Int(_) | Term::Float(_) | Term::Bool(_) | Term::Atom(_) | Term::String(_)
  )
}

/// Renders `term` with a fresh visited set.
pub fn format_term(graph: &Graph, term: TermRef) -> String {
  let mut visited = HashSet::new();
  term_string(graph, term, &mut visited)
}

/// A record or arity label prints bare if it is an atom; anything else falls back to
/// full term rendering.
fn label_text(graph: &Graph, label: TermRef, visited: &mut HashSet<TermRef>) -> String {
  match &graph[label] {
    Term::Atom(name) => name.to_string(),
    _ => term_string(graph, label, visited)
  }
}

fn field_entries(
  graph: &Graph,
  fields: &[(TermRef, TermRef)],
  visited: &mut HashSet<TermRef>,
) -> Vec<String> {
  fields
    .iter()
    .map(|(feature, value)| {
      format!(
        "{}:{}",
        term_string(graph, *feature, visited),
        term_string(graph, *value, visited)
      )
    })
    .collect()
}

fn term_string(graph: &Graph, term: TermRef, visited: &mut HashSet<TermRef>) -> String {
  let node = &graph[term];
  if is_structured(node) && !visited.insert(term) {
    return "...".to_string();
  }

  match node {
    Term::Int(value) => int_text(*value),
    Term::Float(value) => float_text(*value),
    Term::Bool(true) => "true".to_string(),
    Term::Bool(false) => "false".to_string(),
    Term::Unit => "unit".to_string(),
    Term::Atom(name) => atom_text(name),
    Term::String(text) => format!("\"{}\"", text),

    Term::Cons { head, tail } => format!(
      "{}|{}",
      term_string(graph, *head, visited),
      term_string(graph, *tail, visited)
    ),

    Term::Tuple { label, items } => {
      // A `#` tuple of at least two fields prints infix, parenthesizing structured
      // items so the grouping survives re-reading.
      let hash_label = matches!(&graph[*label], Term::Atom(name) if &**name == "#");
      if hash_label && items.len() >= 2 {
        let parts: Vec<String> = items
          .iter()
          .map(|item| {
            let text = term_string(graph, *item, visited);
            if is_structured(&graph[*item]) {
              format!("({})", text)
            } else {
              text
            }
          })
          .collect();
        parts.join("#")
      } else {
        let contents: Vec<String> =
          items.iter().map(|item| term_string(graph, *item, visited)).collect();
        format!("{}({})", term_string(graph, *label, visited), contents.join(" "))
      }
    }

    Term::Record { label, fields } => {
      let entries = field_entries(graph, fields, visited);
      format!("{}({})", label_text(graph, *label, visited), entries.join(" "))
    }

    Term::OpenRecordPattern { label, fields } => {
      let entries = field_entries(graph, fields, visited);
      format!("{}({} ...)", label_text(graph, *label, visited), entries.join(" "))
    }

    Term::Arity { label, features } => format!(
      "<Arity {}/{}>",
      label_text(graph, *label, visited),
      features.len()
    ),

    Term::Builtin { module, name } => format!("{}.{}", module, atom_text(name)),

    Term::CodeArea(area) => format!("<CodeArea '{}'/{}>", area.name, area.arity),

    Term::Wildcard => "_".to_string(),
    Term::Capture(slot) => format!("?X{}", slot),

    Term::Conjunction(items) => {
      let parts: Vec<String> =
        items.iter().map(|item| term_string(graph, *item, visited)).collect();
      parts.join("=")
    }

    // A closure prints as the name of the procedure it closes over.
    Term::Abstraction { code_area, .. } => match &graph[*code_area] {
      Term::CodeArea(area) => area.name.clone(),
      _ => term_string(graph, *code_area, visited)
    },

    Term::Chunk(inner) => format!("<Chunk {}>", term_string(graph, *inner, visited)),
    Term::UniqueName(name) => format!("<UniqueName {}>", name),
    Term::Name(id) => format!("<Name {}>", id),
    Term::NamedName { name, .. } => format!("<Name {}>", name),
  }
}

// region Operands

/// Synthesized structure in an operand cannot cycle, but the constants it points at
/// can, so each constant leaf gets its own fresh visited set.
fn operand_is_structured(graph: &Graph, operand: &Operand) -> bool {
  match operand {
    | Operand::Cons { .. }
    | Operand::Tuple { .. }
    | Operand::Record { .. }
    | Operand::Closure { .. } => true,
    Operand::Constant(term) => is_structured(&graph[*term]),
    _ => false
  }
}

pub fn format_operand(graph: &Graph, operand: &Operand) -> String {
  match operand {
    Operand::Register(register) => register.to_string(),
    Operand::Constant(term) => format_term(graph, *term),
    Operand::Immediate(value) => int_text(*value),
    Operand::Bool(true) => "true".to_string(),
    Operand::Bool(false) => "false".to_string(),
    Operand::Wildcard => "_".to_string(),

    Operand::Cons { head, tail } => {
      format!("{}|{}", format_operand(graph, head), format_operand(graph, tail))
    }

    Operand::Tuple { label, items } => {
      let hash_label = matches!(&graph[*label], Term::Atom(name) if &**name == "#");
      if hash_label && items.len() >= 2 {
        let parts: Vec<String> = items
          .iter()
          .map(|item| {
            let text = format_operand(graph, item);
            if operand_is_structured(graph, item) {
              format!("({})", text)
            } else {
              text
            }
          })
          .collect();
        parts.join("#")
      } else {
        let contents: Vec<String> =
          items.iter().map(|item| format_operand(graph, item)).collect();
        format!("{}({})", format_term(graph, *label), contents.join(" "))
      }
    }

    Operand::Record { label, fields } => {
      let entries: Vec<String> = fields
        .iter()
        .map(|(feature, value)| {
          format!("{}:{}", format_term(graph, *feature), format_operand(graph, value))
        })
        .collect();
      let label_text = match &graph[*label] {
        Term::Atom(name) => name.to_string(),
        _ => format_term(graph, *label)
      };
      format!("{}({})", label_text, entries.join(" "))
    }

    Operand::Closure { code_area, .. } => match &graph[*code_area] {
      Term::CodeArea(area) => area.name.clone(),
      _ => format_term(graph, *code_area)
    },
  }
}

// endregion

// region Instructions

/// One instruction in assembly-listing form. Some instructions span multiple lines;
/// the caller prefixes each line with the program-counter gutter.
pub fn format_instruction(graph: &Graph, instruction: &Instruction) -> String {
  match instruction {
    Instruction::Skip => "skip".to_string(),

    Instruction::Move { source, target, unify } => format!(
      "{} {} {}",
      format_operand(graph, target),
      if *unify { "=" } else { "<-" },
      format_operand(graph, source)
    ),

    Instruction::MoveMove { first, second } => format!(
      "{} <- {}\n{} <- {}",
      format_operand(graph, &first.1),
      format_operand(graph, &first.0),
      format_operand(graph, &second.1),
      format_operand(graph, &second.0)
    ),

    Instruction::Allocate { locals } => {
      let regs: Vec<String> = locals.iter().map(|reg| reg.to_string()).collect();
      format!("alloc {}", regs.join(" "))
    }

    Instruction::CreateVariable { target } => {
      format!("{} <- _", format_operand(graph, target))
    }

    Instruction::CreateVariableMove { target, copy } => {
      let target = format_operand(graph, target);
      format!("{} <- _\n{} <- {}", target, format_operand(graph, copy), target)
    }

    Instruction::SetupExceptionHandler => "setup_eh".to_string(),
    Instruction::PopExceptionHandler => "pop_eh".to_string(),

    Instruction::Call { function, args, tail } => {
      let args: Vec<String> = args.iter().map(|arg| format_operand(graph, arg)).collect();
      let call = format!("{{{} {}}}", format_operand(graph, function), args.join(" "));
      if *tail {
        format!("tail {}", call)
      } else {
        call
      }
    }

    Instruction::Return => "return".to_string(),

    Instruction::Branch { target } => format!("goto {}", target),

    Instruction::CondBranch { test, arms, else_target } => {
      let mut text = format!("goto case {}\n", format_operand(graph, test));
      for (index, (pattern, target)) in arms.iter().enumerate() {
        let connective = if index == 0 { "of" } else { "[]" };
        text.push_str(&format!(
          "  {} {} then {}\n",
          connective,
          format_operand(graph, pattern),
          target
        ));
      }
      if let Some(target) = else_target {
        text.push_str(&format!("  else {}\n", target));
      }
      text.push_str("end");
      text
    }

    Instruction::InlineBinaryArith { lhs, op, rhs, target } => format!(
      "{} <- {} {} {}",
      format_operand(graph, target),
      format_operand(graph, lhs),
      op,
      format_operand(graph, rhs)
    ),

    Instruction::InlineGetClass { source, target } => format!(
      "{} <- {{Object.getClass {}}}",
      format_operand(graph, target),
      format_operand(graph, source)
    ),

    Instruction::Unrecognized { words } => {
      let mut text = "% unknown opcodes".to_string();
      for word in words {
        text.push_str(&format!(" {:04x}", word));
      }
      text
    }
  }
}

// endregion

#[cfg(test)]
mod tests {
  use string_cache::DefaultAtom;

  use crate::bytecode::Register;

  use super::*;

  fn graph_of(nodes: Vec<Term>, root: usize) -> Graph {
    Graph { nodes, root: TermRef::new(root) }
  }

  #[test]
  fn atoms_quote_when_they_must() {
    assert_eq!(atom_text("foo"), "foo");
    assert_eq!(atom_text("fooBar_9"), "fooBar_9");
    assert_eq!(atom_text("Foo"), "'Foo'");
    assert_eq!(atom_text("then"), "'then'");
    assert_eq!(atom_text("two words"), "'two words'");
    assert_eq!(atom_text("it's"), "'it\\'s'");
    assert_eq!(atom_text(""), "''");
  }

  #[test]
  fn numbers_use_the_oz_minus_sign() {
    let graph = graph_of(vec![Term::Int(-5)], 0);
    assert_eq!(format_term(&graph, graph.root()), "~5");

    let graph = graph_of(vec![Term::Float(-2.5)], 0);
    assert_eq!(format_term(&graph, graph.root()), "~2.5");
  }

  #[test]
  fn floats_keep_a_fractional_part() {
    let graph = graph_of(vec![Term::Float(3.0)], 0);
    assert_eq!(format_term(&graph, graph.root()), "3.0");
  }

  #[test]
  fn hash_tuples_print_infix_with_parenthesized_structure() {
    let graph = graph_of(
      vec![
        Term::Atom(DefaultAtom::from("#")),
        Term::Int(1),
        Term::Atom(DefaultAtom::from("nil")),
        Term::Cons { head: TermRef::new(1), tail: TermRef::new(2) },
        Term::Tuple {
          label: TermRef::new(0),
          items: vec![TermRef::new(1), TermRef::new(3)]
        },
      ],
      4,
    );
    assert_eq!(format_term(&graph, graph.root()), "1#(1|nil)");
  }

  #[test]
  fn ordinary_tuples_print_prefix() {
    let graph = graph_of(
      vec![
        Term::Atom(DefaultAtom::from("point")),
        Term::Int(3),
        Term::Int(4),
        Term::Tuple {
          label: TermRef::new(0),
          items: vec![TermRef::new(1), TermRef::new(2)]
        },
      ],
      3,
    );
    assert_eq!(format_term(&graph, graph.root()), "point(3 4)");
  }

  #[test]
  fn records_pair_features_with_values() {
    let graph = graph_of(
      vec![
        Term::Atom(DefaultAtom::from("point")),
        Term::Atom(DefaultAtom::from("x")),
        Term::Atom(DefaultAtom::from("y")),
        Term::Int(3),
        Term::Int(4),
        Term::Record {
          label: TermRef::new(0),
          fields: vec![
            (TermRef::new(1), TermRef::new(3)),
            (TermRef::new(2), TermRef::new(4)),
          ]
        },
      ],
      5,
    );
    assert_eq!(format_term(&graph, graph.root()), "point(x:3 y:4)");
  }

  #[test]
  fn cycles_terminate_with_ellipsis() {
    // x = 1|x
    let graph = graph_of(
      vec![
        Term::Int(1),
        Term::Cons { head: TermRef::new(0), tail: TermRef::new(1) },
      ],
      1,
    );
    assert_eq!(format_term(&graph, graph.root()), "1|...");
  }

  #[test]
  fn shared_nodes_print_once_per_render() {
    let graph = graph_of(
      vec![
        Term::Atom(DefaultAtom::from("nil")),
        Term::Cons { head: TermRef::new(0), tail: TermRef::new(0) },
        Term::Cons { head: TermRef::new(1), tail: TermRef::new(1) },
      ],
      2,
    );
    // The second occurrence of node 1 elides.
    assert_eq!(format_term(&graph, graph.root()), "nil|nil|...");
  }

  #[test]
  fn builtins_print_dotted() {
    let graph = graph_of(
      vec![Term::Builtin {
        module: DefaultAtom::from("Number"),
        name: DefaultAtom::from("+")
      }],
      0,
    );
    assert_eq!(format_term(&graph, graph.root()), "Number.'+'");
  }

  #[test]
  fn move_instructions_render_assignment_or_unification() {
    let graph = graph_of(vec![Term::Unit], 0);
    let assign = Instruction::Move {
      source: Operand::Register(Register::argument(1)),
      target: Operand::Register(Register::local(2)),
      unify: false,
    };
    assert_eq!(format_instruction(&graph, &assign), "Y2 <- X1");

    let unify = Instruction::Move {
      source: Operand::Register(Register::argument(1)),
      target: Operand::Register(Register::local(2)),
      unify: true,
    };
    assert_eq!(format_instruction(&graph, &unify), "Y2 = X1");
  }

  #[test]
  fn calls_brace_the_function_and_arguments() {
    let graph = graph_of(vec![Term::Atom(DefaultAtom::from("show"))], 0);
    let call = Instruction::Call {
      function: Operand::Constant(TermRef::new(0)),
      args: vec![Operand::Register(Register::argument(0))],
      tail: true,
    };
    assert_eq!(format_instruction(&graph, &call), "tail {show X0}");
  }

  #[test]
  fn conditional_branches_render_as_case_blocks() {
    let graph = graph_of(vec![Term::Unit], 0);
    let branch = Instruction::CondBranch {
      test: Operand::Register(Register::argument(0)),
      arms: vec![(Operand::Bool(true), 4), (Operand::Bool(false), 9)],
      else_target: Some(12),
    };
    assert_eq!(
      format_instruction(&graph, &branch),
      "goto case X0\n  of true then 4\n  [] false then 9\n  else 12\nend"
    );
  }

  #[test]
  fn unrecognized_words_dump_as_hex() {
    let graph = graph_of(vec![Term::Unit], 0);
    let instruction = Instruction::Unrecognized { words: vec![0x0091, 0xBEEF] };
    assert_eq!(format_instruction(&graph, &instruction), "% unknown opcodes 0091 beef");
  }
}
