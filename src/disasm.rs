/*!
  The disassembly driver. A resolved graph in hand, it walks every reachable node
  once, finds the code areas, and prints each one as an `asm proc ... end` block:
  header naming the procedure and its formal X registers, one gutter-prefixed line
  per decoded instruction, and a trailer carrying the word count of the code blob.
*/

use std::collections::HashSet;
use std::io::Write;

use prettytable::{format as TableFormat, Table};

use crate::bytecode::{code_words, InstructionIter};
use crate::ozify::format_instruction;
use crate::term::{CodeArea, Graph, Term, TermRef};

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
    .column_separator('│')
    .borders(' ')
    .separator(
      TableFormat::LinePosition::Title,
      TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
    )
    .separator(
      TableFormat::LinePosition::Bottom,
      TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
    )
    .padding(1, 1)
    .build();
}

/// Handles of every code area reachable from the root, in depth-first discovery
/// order. The visited set makes shared and cyclic structure harmless.
pub fn collect_code_areas(graph: &Graph) -> Vec<TermRef> {
  let mut visited: HashSet<TermRef> = HashSet::new();
  let mut found = Vec::new();
  let mut pending = vec![graph.root()];

  while let Some(handle) = pending.pop() {
    if !visited.insert(handle) {
      continue;
    }
    let node = &graph[handle];
    // Code areas descend through their constant pool only; debug data stays opaque.
    let children = match node {
      Term::CodeArea(area) => {
        found.push(handle);
        area.constants.clone()
      }
      other => other.children()
    };
    // Stack discipline: push children reversed so they pop in declaration order.
    pending.extend(children.into_iter().rev());
  }

  found
}

fn display_name(area: &CodeArea) -> &str {
  if area.name.is_empty() {
    "$"
  } else {
    &area.name
  }
}

fn dump_code_area<W: Write>(out: &mut W, graph: &Graph, area: &CodeArea) -> anyhow::Result<()> {
  let formals: Vec<String> = (0..area.arity).map(|index| format!("X{}", index)).collect();
  writeln!(out, "asm proc {{{} {}}}", display_name(area), formals.join(" "))?;

  if area.xcount > area.arity {
    let temporaries: Vec<String> =
      (area.arity..area.xcount).map(|index| format!("X{}", index)).collect();
    writeln!(out, "  {}", temporaries.join(" "))?;
    writeln!(out, "in")?;
  }

  let words = code_words(&area.code);
  for step in InstructionIter::new(graph, &words, &area.constants) {
    let (pc, instruction) = step?;
    let prefix = format!("  /* {:4} */    ", pc);
    for line in format_instruction(graph, &instruction).split('\n') {
      writeln!(out, "{} {}", prefix, line)?;
    }
  }

  writeln!(out, "  /* {:4} */\nend\n", words.len())?;
  Ok(())
}

/// Disassembles every reachable code area, in discovery order, to `out`. With a
/// filter, only procedures whose name matches exactly are printed.
pub fn disassemble<W: Write>(
  out: &mut W,
  graph: &Graph,
  filter: Option<&str>,
) -> anyhow::Result<()> {
  for handle in collect_code_areas(graph) {
    if let Term::CodeArea(area) = &graph[handle] {
      match filter {
        Some(name) if name != area.name => continue,
        _ => dump_code_area(out, graph, area)?
      }
    }
  }
  Ok(())
}

/// Prints a one-row-per-procedure summary table instead of full listings.
pub fn list_code_areas<W: Write>(out: &mut W, graph: &Graph) -> anyhow::Result<()> {
  let mut table = Table::new();
  table.set_format(*TABLE_DISPLAY_FORMAT);
  table.set_titles(row![ubl->"Name", ubr->"Arity", ubr->"XCount", ubr->"Words", ubr->"Constants"]);

  for handle in collect_code_areas(graph) {
    if let Term::CodeArea(area) = &graph[handle] {
      table.add_row(row![
        display_name(area),
        r->area.arity,
        r->area.xcount,
        r->area.code.len() / 2,
        r->area.constants.len()
      ]);
    }
  }

  table.print(out)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use crate::pickle::{self, build::PickleBuilder};

  use super::*;

  /// Pickles a module holding one procedure `foo` of arity 1 with one scratch
  /// register, whose body is `skip` then `return`.
  fn foo_module() -> Vec<u8> {
    let mut builder = PickleBuilder::new(3, 1);
    builder
      .unit(3)
      .code_area(2, "foo", 1, 2, &[0x0000, 0x0040], 3, &[])
      .cons(1, 2, 2);
    builder.finish()
  }

  #[test]
  fn reachable_code_areas_are_found_once() {
    let graph = pickle::parse(&foo_module()).unwrap();
    let areas = collect_code_areas(&graph);
    assert_eq!(areas.len(), 1);
    match &graph[areas[0]] {
      Term::CodeArea(area) => assert_eq!(area.name, "foo"),
      other => panic!("unexpected node {:?}", other)
    }
  }

  #[test]
  fn listing_matches_the_expected_shape() {
    let graph = pickle::parse(&foo_module()).unwrap();
    let mut out = Vec::new();
    disassemble(&mut out, &graph, None).unwrap();

    let text = String::from_utf8(out).unwrap();
    let expected = "asm proc {foo X0}\n\
                    \x20 X1\n\
                    in\n\
                    \x20 /*    0 */     skip\n\
                    \x20 /*    1 */     return\n\
                    \x20 /*    2 */\n\
                    end\n\
                    \n";
    assert_eq!(text, expected);
  }

  #[test]
  fn filter_keeps_only_matching_procedures() {
    let graph = pickle::parse(&foo_module()).unwrap();

    let mut kept = Vec::new();
    disassemble(&mut kept, &graph, Some("foo")).unwrap();
    assert!(!kept.is_empty());

    let mut dropped = Vec::new();
    disassemble(&mut dropped, &graph, Some("bar")).unwrap();
    assert!(dropped.is_empty());
  }

  #[test]
  fn anonymous_procedures_print_a_dollar_sign() {
    let mut builder = PickleBuilder::new(2, 1);
    builder.unit(2).code_area(1, "", 0, 0, &[0x0040], 2, &[]);
    let graph = pickle::parse(&builder.finish()).unwrap();

    let mut out = Vec::new();
    disassemble(&mut out, &graph, None).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("asm proc {$ }\n"));
  }
}
