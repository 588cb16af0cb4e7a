//! Prompt templates.
//!
//! A template is plain text with `{name}` placeholders. `name` is either a
//! step name (or `source`), resolved against the rendered node's ancestors,
//! or the reserved `{instructions}`, which expands to one instruction drawn
//! at random from each configured category.
//!
//! Braces that do not enclose an identifier (`{"answer": "YES"}`) are left
//! untouched, so JSON examples can be embedded in prompts.

use std::collections::{BTreeMap, HashMap};

use rand::seq::IndexedRandom;

use crate::model::Node;
use crate::pipeline::ExecutorError;
use crate::storage::Database;

/// Placeholder expanded from a generation step's instruction sets.
pub const INSTRUCTIONS_VARIABLE: &str = "instructions";

enum Segment<'a> {
    Text(&'a str),
    Variable(&'a str),
}

fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_variable_name(&after[..close]) => {
                if open > 0 {
                    segments.push(Segment::Text(&rest[..open]));
                }
                segments.push(Segment::Variable(&after[..close]));
                rest = &after[close + 1..];
            }
            _ => {
                segments.push(Segment::Text(&rest[..=open]));
                rest = after;
            }
        }
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    segments
}

/// Distinct placeholder names in order of first appearance.
pub fn template_variables(template: &str) -> Vec<String> {
    let mut variables: Vec<String> = Vec::new();
    for segment in parse(template) {
        if let Segment::Variable(name) = segment {
            if !variables.iter().any(|v| v == name) {
                variables.push(name.to_string());
            }
        }
    }
    variables
}

fn substitute<'v>(template: &str, lookup: impl Fn(&str) -> Option<&'v str>) -> String {
    let mut rendered = String::with_capacity(template.len());
    for segment in parse(template) {
        match segment {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Variable(name) => match lookup(name) {
                Some(value) => rendered.push_str(value),
                None => {
                    rendered.push('{');
                    rendered.push_str(name);
                    rendered.push('}');
                }
            },
        }
    }
    rendered
}

/// One `- instruction` line per category.
pub fn draw_instructions(instruction_sets: &BTreeMap<String, Vec<String>>) -> String {
    let mut rng = rand::rng();
    instruction_sets
        .values()
        .filter_map(|instructions| instructions.choose(&mut rng))
        .map(|instruction| format!("- {}", instruction))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders `template` once per node, in node order.
///
/// Ancestor values are fetched in a single batch. A node without the
/// ancestor a placeholder names fails the whole render.
pub async fn render_prompts(
    db: &Database,
    template: &str,
    nodes: &[Node],
    instruction_sets: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, ExecutorError> {
    let variables = template_variables(template);
    if variables.is_empty() {
        return Ok(vec![template.to_string(); nodes.len()]);
    }

    let lineage_variables: Vec<&str> = variables
        .iter()
        .map(String::as_str)
        .filter(|v| *v != INSTRUCTIONS_VARIABLE)
        .collect();

    let mut ancestor_ids = Vec::new();
    for node in nodes {
        for variable in &lineage_variables {
            let id = node.ancestors.get(*variable).ok_or_else(|| {
                ExecutorError::Template(format!(
                    "node {} has no '{}' ancestor",
                    node.id.map_or_else(|| "(new)".to_string(), |id| id.to_string()),
                    variable
                ))
            })?;
            if !ancestor_ids.contains(id) {
                ancestor_ids.push(*id);
            }
        }
    }

    let values: HashMap<i64, String> = db
        .fetch_nodes(&ancestor_ids)
        .await?
        .into_iter()
        .filter_map(|node| node.id.map(|id| (id, node.value)))
        .collect();

    let uses_instructions = variables.iter().any(|v| v == INSTRUCTIONS_VARIABLE);

    let prompts = nodes
        .iter()
        .map(|node| {
            let instructions = if uses_instructions {
                draw_instructions(instruction_sets)
            } else {
                String::new()
            };
            substitute(template, |name| {
                if name == INSTRUCTIONS_VARIABLE {
                    return Some(instructions.as_str());
                }
                node.ancestors
                    .get(name)
                    .and_then(|id| values.get(id))
                    .map(String::as_str)
            })
        })
        .collect();

    Ok(prompts)
}

/// Renders a template for a single node.
pub async fn render_prompt(
    db: &Database,
    template: &str,
    node: &Node,
) -> Result<String, ExecutorError> {
    let mut prompts =
        render_prompts(db, template, std::slice::from_ref(node), &BTreeMap::new()).await?;
    prompts
        .pop()
        .ok_or_else(|| ExecutorError::Template("template rendered no prompt".to_string()))
}
