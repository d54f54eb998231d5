//! Rendering of deserialized graphs for display.
//!
//! The output looks like JSON, with two additions: object values are
//! prefixed by their type name, and an aggregate reachable from more than one
//! place is labelled `#n` where it is first printed and shown as `<ref #n>`
//! everywhere else. That keeps cycles finite and makes shared identity
//! visible.

use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind, Write};

use anyhow::Context as _;
use colored::Colorize;

use crate::value::{MultiArray, Value};

/// Returns the depth of the graph under `value`, scalars counting as 1.
/// An edge back into an aggregate already on the current path counts as a
/// leaf.
pub fn depth(value: &Value) -> usize {
    fn walk(value: &Value, path: &mut HashSet<usize>) -> usize {
        let Some(identity) = value.identity() else {
            return 1;
        };
        if !path.insert(identity) {
            return 1;
        }
        let inner = children(value)
            .iter()
            .map(|child| walk(child, path))
            .max()
            .unwrap_or(0);
        path.remove(&identity);
        1 + inner
    }
    walk(value, &mut HashSet::new())
}

/// Direct children of an aggregate, in display order.
fn children(value: &Value) -> Vec<Value> {
    match value {
        Value::List(list) => list.borrow().clone(),
        Value::Array(array) => array.borrow().items.clone(),
        Value::Dictionary(dictionary) => {
            dictionary.borrow().values().cloned().collect()
        }
        Value::Object(object) => {
            object.borrow().fields().map(|(_, v)| v.clone()).collect()
        }
        _ => vec![],
    }
}

/// Identities of the aggregates reached through more than one edge.
fn shared_identities(root: &Value) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut shared = HashSet::new();
    let mut stack = vec![root.clone()];
    while let Some(value) = stack.pop() {
        let Some(identity) = value.identity() else {
            continue;
        };
        if !seen.insert(identity) {
            shared.insert(identity);
            continue;
        }
        stack.extend(children(&value));
    }
    shared
}

/// Write a deserialized graph, colorized, followed by a newline. Silently
/// returns `Ok(())` on broken pipe so that piping to tools like `less` or
/// `head` exits cleanly.
///
/// # Errors
///
/// Returns an error if writing to `writer` fails.
pub fn write_graph<W: Write>(
    writer: &mut W,
    value: &Value,
    pretty: bool,
) -> anyhow::Result<()> {
    let mut labels = Labels {
        shared: shared_identities(value),
        assigned: HashMap::new(),
    };

    let result = (|| -> io::Result<()> {
        write_value(writer, value, 0, pretty, &mut labels)?;
        writeln!(writer)?;
        Ok(())
    })();

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err).context("write graph to stdout"),
    }
}

struct Labels {
    shared: HashSet<usize>,
    assigned: HashMap<usize, usize>,
}

impl Labels {
    /// `Err(n)` if the aggregate was already printed as `#n`, otherwise the
    /// label to print it with, if it needs one.
    fn visit(&mut self, identity: usize) -> Result<Option<usize>, usize> {
        if let Some(&label) = self.assigned.get(&identity) {
            return Err(label);
        }
        if !self.shared.contains(&identity) {
            return Ok(None);
        }
        let label = self.assigned.len() + 1;
        self.assigned.insert(identity, label);
        Ok(Some(label))
    }
}

/// Recursively write a value with syntax highlighting.
fn write_value<W: Write>(
    writer: &mut W,
    value: &Value,
    indent: usize,
    pretty: bool,
    labels: &mut Labels,
) -> io::Result<()> {
    if let Some(identity) = value.identity() {
        match labels.visit(identity) {
            Err(label) => {
                let reference = format!("<ref #{label}>");
                return write!(writer, "{}", reference.magenta());
            }
            Ok(Some(label)) => {
                write!(writer, "{} ", format!("#{label}").magenta().bold())?;
            }
            Ok(None) => {}
        }
    }

    match value {
        Value::Null => write!(writer, "{}", "null".red().dimmed()),
        Value::Bool(b) => write!(writer, "{}", b.to_string().yellow().bold()),
        Value::Integer(n) => write!(writer, "{}", n.to_string().yellow()),
        Value::Float(n) => write!(writer, "{}", format!("{n:?}").yellow()),
        Value::String(s) => write_string(writer, s),
        Value::List(list) => {
            let items = list.borrow().clone();
            write_items(writer, &items, indent, pretty, labels)
        }
        Value::Array(array) => {
            let array = array.borrow().clone();
            write_rows(writer, &array, 0, 0, indent, pretty, labels)
        }
        Value::Dictionary(dictionary) => {
            let entries: Vec<(String, Value)> = dictionary
                .borrow()
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect();
            write_entries(writer, &entries, indent, pretty, labels)
        }
        Value::Object(object) => {
            let (name, entries) = {
                let object = object.borrow();
                let entries: Vec<(String, Value)> = object
                    .fields()
                    .map(|(name, value)| (name.to_owned(), value.clone()))
                    .collect();
                (object.object_type().name().to_owned(), entries)
            };
            write!(writer, "{} ", name.blue().bold())?;
            write_entries(writer, &entries, indent, pretty, labels)
        }
    }
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    // NOTE: Re-serialize to get proper JSON escaping and quoting.
    let quoted = serde_json::to_string(s).map_err(io::Error::other)?;
    write!(writer, "{}", quoted.green())
}

fn write_break<W: Write>(
    writer: &mut W,
    indent: usize,
    pretty: bool,
) -> io::Result<()> {
    if pretty {
        writeln!(writer)?;
        write!(writer, "{:width$}", "", width = indent)?;
    }
    Ok(())
}

fn write_items<W: Write>(
    writer: &mut W,
    items: &[Value],
    indent: usize,
    pretty: bool,
    labels: &mut Labels,
) -> io::Result<()> {
    let next_indent = indent + 2;
    write!(writer, "[")?;
    for (i, item) in items.iter().enumerate() {
        write_break(writer, next_indent, pretty)?;
        write_value(writer, item, next_indent, pretty, labels)?;
        if i < items.len() - 1 {
            write!(writer, ",")?;
        }
    }
    if !items.is_empty() {
        write_break(writer, indent, pretty)?;
    }
    write!(writer, "]")
}

/// Writes dimension `dim` of `array` as nested rows, starting at flat index
/// `offset`.
fn write_rows<W: Write>(
    writer: &mut W,
    array: &MultiArray,
    dim: usize,
    offset: usize,
    indent: usize,
    pretty: bool,
    labels: &mut Labels,
) -> io::Result<()> {
    if dim + 1 >= array.rank() {
        let len = array.lengths.get(dim).copied().unwrap_or(0);
        let end = (offset + len).min(array.items.len());
        let row = &array.items[offset.min(end)..end];
        return write_items(writer, row, indent, pretty, labels);
    }

    let next_indent = indent + 2;
    let rows = array.lengths[dim];
    let stride: usize = array.lengths[dim + 1..].iter().product();
    write!(writer, "[")?;
    for row in 0..rows {
        write_break(writer, next_indent, pretty)?;
        write_rows(
            writer,
            array,
            dim + 1,
            offset + row * stride,
            next_indent,
            pretty,
            labels,
        )?;
        if row < rows - 1 {
            write!(writer, ",")?;
        }
    }
    if rows > 0 {
        write_break(writer, indent, pretty)?;
    }
    write!(writer, "]")
}

fn write_entries<W: Write>(
    writer: &mut W,
    entries: &[(String, Value)],
    indent: usize,
    pretty: bool,
    labels: &mut Labels,
) -> io::Result<()> {
    let next_indent = indent + 2;
    write!(writer, "{{")?;
    for (i, (key, value)) in entries.iter().enumerate() {
        write_break(writer, next_indent, pretty)?;
        // Key with quotes -> colored cyan.
        let quoted_key = serde_json::to_string(key).map_err(io::Error::other)?;
        write!(writer, "{}", quoted_key.cyan())?;
        if pretty {
            write!(writer, ": ")?;
        } else {
            write!(writer, ":")?;
        }
        write_value(writer, value, next_indent, pretty, labels)?;
        if i < entries.len() - 1 {
            write!(writer, ",")?;
        }
    }
    if !entries.is_empty() {
        write_break(writer, indent, pretty)?;
    }
    write!(writer, "}}")
}
