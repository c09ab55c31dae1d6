//! Location indexer: a dual-mode visitor over the parse tree.
//!
//! In scan mode the visitor records a [`LocIndex`] for every site the
//! engine knows how to mutate. In apply mode it walks the same traversal
//! and emits the single text [`Edit`] for the node whose identity equals
//! the supplied target. Sharing one traversal is the key invariant: the
//! addressing scheme used for discovery is byte-for-byte the scheme used
//! for rewriting, so a recorded identity always relocates its node.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

use crate::error::{Error, Result};
use crate::ops::MutationOp;

/// Identity of one mutable position in a parse tree.
///
/// Value-equal and orderable; used as a set member and map key. Line
/// numbers are 1-based, columns 0-based, matching the host runtime's own
/// AST conventions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LocIndex {
    pub ast_class: &'static str,
    pub lineno: usize,
    pub col_offset: usize,
    pub end_lineno: Option<usize>,
    pub end_col_offset: Option<usize>,
    pub op_type: MutationOp,
}

/// A single byte-range replacement in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start_byte: usize,
    pub end_byte: usize,
    pub replacement: String,
}

/// Splice an edit into the source, leaving the input untouched.
pub fn apply_edit(source: &str, edit: &Edit) -> String {
    let mut out = String::with_capacity(source.len() + edit.replacement.len());
    out.push_str(&source[..edit.start_byte]);
    out.push_str(&edit.replacement);
    out.push_str(&source[edit.end_byte..]);
    out
}

/// Parse Python source into a tree.
///
/// Trees containing syntax errors are rejected so that a half-parsed file
/// can never contribute bogus mutation sites.
pub fn parse(source: &str, src_file: &Path) -> Result<Tree> {
    let mut parser = Parser::new();
    let language = tree_sitter_python::LANGUAGE;
    parser
        .set_language(&language.into())
        .expect("Failed to set Python grammar");

    let tree = parser.parse(source, None).ok_or_else(|| Error::Parse {
        file: src_file.to_path_buf(),
        detail: "parser returned no tree".to_string(),
    })?;

    if tree.root_node().has_error() {
        return Err(Error::Parse {
            file: src_file.to_path_buf(),
            detail: "source contains syntax errors".to_string(),
        });
    }

    Ok(tree)
}

/// The dual-mode tree visitor.
pub struct MutateVisitor<'a> {
    source: &'a str,
    target: Option<(&'a LocIndex, MutationOp)>,
    locs: BTreeSet<LocIndex>,
    edit: Option<Edit>,
}

impl<'a> MutateVisitor<'a> {
    /// Scan mode: collect the identities of all mutable sites.
    pub fn scan(source: &'a str, tree: &Tree) -> BTreeSet<LocIndex> {
        let mut visitor = MutateVisitor {
            source,
            target: None,
            locs: BTreeSet::new(),
            edit: None,
        };
        visitor.walk(tree.root_node());
        visitor.locs
    }

    /// Apply mode: run the same traversal and return the edit for the
    /// node whose identity equals `target`, substituting `mutation`.
    pub fn apply(
        source: &'a str,
        tree: &Tree,
        target: &'a LocIndex,
        mutation: MutationOp,
    ) -> Option<Edit> {
        let mut visitor = MutateVisitor {
            source,
            target: Some((target, mutation)),
            locs: BTreeSet::new(),
            edit: None,
        };
        visitor.walk(tree.root_node());
        visitor.edit
    }

    fn walk(&mut self, node: Node) {
        match node.kind() {
            "binary_operator" => self.visit_binary_operator(node),
            "boolean_operator" => self.visit_boolean_operator(node),
            "comparison_operator" => self.visit_comparison_operator(node),
            "augmented_assignment" => self.visit_augmented_assignment(node),
            "if_statement" | "elif_clause" => self.visit_if(node),
            "true" | "false" | "none" => self.visit_name_constant(node),
            "subscript" => self.visit_subscript(node),
            _ => {}
        }

        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                self.walk(child);
            }
        }
    }

    fn text(&self, node: Node) -> &'a str {
        &self.source[node.start_byte()..node.end_byte()]
    }

    fn loc_index(&self, ast_class: &'static str, anchor: Node, op_type: MutationOp) -> LocIndex {
        LocIndex {
            ast_class,
            lineno: anchor.start_position().row + 1,
            col_offset: anchor.start_position().column,
            end_lineno: Some(anchor.end_position().row + 1),
            end_col_offset: Some(anchor.end_position().column),
            op_type,
        }
    }

    /// The mutation to apply when `idx` is the visitor's target.
    fn match_target(&self, idx: &LocIndex) -> Option<MutationOp> {
        match self.target {
            Some((target, mutation)) if target == idx => Some(mutation),
            _ => None,
        }
    }

    fn record(&mut self, idx: LocIndex) -> Option<MutationOp> {
        let mutation = self.match_target(&idx);
        self.locs.insert(idx);
        mutation
    }

    fn token_edit(&mut self, node: Node, mutation: MutationOp, idx: &LocIndex) {
        if let Some(token) = mutation.token() {
            debug!(
                "mutating ({}, {}) {} -> {}",
                idx.lineno, idx.col_offset, idx.op_type, mutation
            );
            self.edit = Some(Edit {
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
                replacement: token.to_string(),
            });
        }
    }

    /// Binary operators: arithmetic, bitwise comparison and bit shifts,
    /// keyed on the operator class at the node's position.
    fn visit_binary_operator(&mut self, node: Node) {
        let Some(op_node) = node.child_by_field_name("operator") else {
            return;
        };
        let (ast_class, op_type) = match op_node.kind() {
            "+" => ("BinOp", MutationOp::Add),
            "-" => ("BinOp", MutationOp::Sub),
            "*" => ("BinOp", MutationOp::Mult),
            "/" => ("BinOp", MutationOp::Div),
            "//" => ("BinOp", MutationOp::FloorDiv),
            "%" => ("BinOp", MutationOp::Mod),
            "**" => ("BinOp", MutationOp::Pow),
            "&" => ("BinOpBC", MutationOp::BitAnd),
            "|" => ("BinOpBC", MutationOp::BitOr),
            "^" => ("BinOpBC", MutationOp::BitXor),
            "<<" => ("BinOpBS", MutationOp::LShift),
            ">>" => ("BinOpBS", MutationOp::RShift),
            _ => return,
        };

        let idx = self.loc_index(ast_class, node, op_type);
        if let Some(mutation) = self.record(idx.clone()) {
            self.token_edit(op_node, mutation, &idx);
        }
    }

    /// Boolean connectives: and/or.
    fn visit_boolean_operator(&mut self, node: Node) {
        let Some(op_node) = node.child_by_field_name("operator") else {
            return;
        };
        let op_type = match op_node.kind() {
            "and" => MutationOp::And,
            "or" => MutationOp::Or,
            _ => return,
        };

        let idx = self.loc_index("BoolOp", node, op_type);
        if let Some(mutation) = self.record(idx.clone()) {
            self.token_edit(op_node, mutation, &idx);
        }
    }

    /// Comparisons: ordering/equality, identity and membership, each its
    /// own category. Only the first operator of a chained comparison is
    /// addressed; multi-operator chains are rare and left alone.
    fn visit_comparison_operator(&mut self, node: Node) {
        let mut first = None;
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else { continue };
            let mapped = match child.kind() {
                "==" => ("Compare", MutationOp::Eq),
                "!=" => ("Compare", MutationOp::NotEq),
                "<" => ("Compare", MutationOp::Lt),
                "<=" => ("Compare", MutationOp::LtE),
                ">" => ("Compare", MutationOp::Gt),
                ">=" => ("Compare", MutationOp::GtE),
                "is" => ("CompareIs", MutationOp::Is),
                "is not" => ("CompareIs", MutationOp::IsNot),
                "in" => ("CompareIn", MutationOp::In),
                "not in" => ("CompareIn", MutationOp::NotIn),
                _ => continue,
            };
            first = Some((child, mapped));
            break;
        }

        let Some((op_node, (ast_class, op_type))) = first else {
            return;
        };

        let idx = self.loc_index(ast_class, node, op_type);
        if let Some(mutation) = self.record(idx.clone()) {
            self.token_edit(op_node, mutation, &idx);
        }
    }

    /// Augmented assignment: += -= *= /= via synthetic tags, because the
    /// augmented forms overlap the plain binary-operator type space.
    /// Unrecognized augmented operators are left untouched.
    fn visit_augmented_assignment(&mut self, node: Node) {
        let Some(op_node) = node.child_by_field_name("operator") else {
            return;
        };
        let op_type = match op_node.kind() {
            "+=" => MutationOp::AugAdd,
            "-=" => MutationOp::AugSub,
            "*=" => MutationOp::AugMult,
            "/=" => MutationOp::AugDiv,
            other => {
                debug!(
                    "({}, {}): unknown augmented assignment: {}",
                    node.start_position().row + 1,
                    node.start_position().column,
                    other
                );
                return;
            }
        };

        let idx = self.loc_index("AugAssign", node, op_type);
        if let Some(mutation) = self.record(idx.clone()) {
            self.token_edit(op_node, mutation, &idx);
        }
    }

    /// Conditional-branch tests. A test that is already a boolean literal
    /// is addressed as that literal so it can be flipped in place; any
    /// other test lands in the generic If_Statement bucket, which is a
    /// classification only, never a substitution target.
    fn visit_if(&mut self, node: Node) {
        let Some(condition) = node.child_by_field_name("condition") else {
            return;
        };
        let op_type = match condition.kind() {
            "true" => MutationOp::IfTrue,
            "false" => MutationOp::IfFalse,
            _ => MutationOp::IfStatement,
        };

        let idx = self.loc_index("If", node, op_type);
        if let Some(mutation) = self.record(idx.clone()) {
            self.token_edit(condition, mutation, &idx);
        }
    }

    /// Named constant literals: True/False/None, keyed on the literal's
    /// own value.
    fn visit_name_constant(&mut self, node: Node) {
        let op_type = match node.kind() {
            "true" => MutationOp::ConstTrue,
            "false" => MutationOp::ConstFalse,
            "none" => MutationOp::ConstNone,
            _ => return,
        };

        let idx = self.loc_index("NameConstant", node, op_type);
        if let Some(mutation) = self.record(idx.clone()) {
            self.token_edit(node, mutation, &idx);
        }
    }

    /// Subscript expressions carry two independent site families: numeric
    /// literal indices bucketed by sign, and slice swap/narrow sites.
    fn visit_subscript(&mut self, node: Node) {
        let Some(sub) = node.child_by_field_name("subscript") else {
            return;
        };

        match sub.kind() {
            "integer" => {
                let op_type = if parsed_int(self.text(sub)) == Some(0) {
                    MutationOp::IndexZero
                } else {
                    MutationOp::IndexPos
                };
                let idx = self.loc_index("Index", sub, op_type);
                if let Some(mutation) = self.record(idx.clone()) {
                    self.token_edit(sub, mutation, &idx);
                }
            }
            "unary_operator" => {
                if negative_int_literal(sub, self.source).is_none() {
                    return;
                }
                let idx = self.loc_index("Index", sub, MutationOp::IndexNeg);
                if let Some(mutation) = self.record(idx.clone()) {
                    self.token_edit(sub, mutation, &idx);
                }
            }
            "slice" => self.visit_slice(node, sub),
            _ => {}
        }
    }

    /// Slice sites: half-bounded slices join the swap family, slices with
    /// a literal upper bound join the range-change family. Fully
    /// unbounded slices and non-literal bounds are not indexed.
    fn visit_slice(&mut self, subscript: Node, slice: Node) {
        let (lower, upper, step) = split_slice(slice);
        let step_text = step.map(|s| self.text(s));

        let site = match (lower, upper) {
            (None, Some(_)) => Some(("SliceUS", MutationOp::SliceUnboundLower)),
            (Some(_), None) => Some(("SliceUS", MutationOp::SliceUnboundUpper)),
            (Some(_), Some(u)) => match u.kind() {
                "integer" => Some(("SliceRC", MutationOp::SliceUPosToZero)),
                "unary_operator" if negative_int_literal(u, self.source).is_some() => {
                    Some(("SliceRC", MutationOp::SliceUNegToZero))
                }
                _ => None,
            },
            (None, None) => None,
        };

        let Some((ast_class, op_type)) = site else {
            return;
        };

        let idx = self.loc_index(ast_class, subscript, op_type);
        let Some(mutation) = self.record(idx.clone()) else {
            return;
        };

        let lower_text = lower.map(|n| self.text(n));
        let upper_text = upper.map(|n| self.text(n));

        let replacement = match mutation {
            // x[:2] -> x[2:], the bound moves to the lower position
            MutationOp::SliceUnboundUpper => slice_text(upper_text, None, step_text),
            // x[1:] -> x[:1]
            MutationOp::SliceUnboundLower => slice_text(None, lower_text, step_text),
            MutationOp::SliceUnbounded => slice_text(None, None, step_text),
            // x[2:4] -> x[2:3]
            MutationOp::SliceUPosToZero => {
                let Some(n) = upper.and_then(|u| parsed_int(self.text(u))) else {
                    return;
                };
                slice_text(lower_text, Some(&(n - 1).to_string()), step_text)
            }
            // x[-4:-3] -> x[-4:-2], the bound moves toward zero
            MutationOp::SliceUNegToZero => {
                let Some(n) = upper.and_then(|u| negative_int_literal(u, self.source)) else {
                    return;
                };
                slice_text(lower_text, Some(&format!("-{}", n - 1)), step_text)
            }
            _ => return,
        };

        debug!(
            "mutating ({}, {}) {} -> {}: [{}]",
            idx.lineno, idx.col_offset, idx.op_type, mutation, replacement
        );
        self.edit = Some(Edit {
            start_byte: slice.start_byte(),
            end_byte: slice.end_byte(),
            replacement,
        });
    }
}

/// Split a slice node into (lower, upper, step) by colon position.
fn split_slice(slice: Node) -> (Option<Node>, Option<Node>, Option<Node>) {
    let (mut lower, mut upper, mut step) = (None, None, None);
    let mut colons = 0;
    for i in 0..slice.child_count() {
        let Some(child) = slice.child(i) else { continue };
        if child.kind() == ":" {
            colons += 1;
            continue;
        }
        match colons {
            0 => lower = Some(child),
            1 => upper = Some(child),
            _ => step = Some(child),
        }
    }
    (lower, upper, step)
}

/// Render slice source text from its parts.
fn slice_text(lower: Option<&str>, upper: Option<&str>, step: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(l) = lower {
        out.push_str(l);
    }
    out.push(':');
    if let Some(u) = upper {
        out.push_str(u);
    }
    if let Some(s) = step {
        out.push(':');
        out.push_str(s);
    }
    out
}

fn parsed_int(text: &str) -> Option<i64> {
    text.replace('_', "").parse::<i64>().ok()
}

/// The magnitude of a `-<integer>` unary expression, if that is what the
/// node is.
fn negative_int_literal(node: Node, source: &str) -> Option<i64> {
    if node.kind() != "unary_operator" {
        return None;
    }
    let op = node.child_by_field_name("operator")?;
    if op.kind() != "-" {
        return None;
    }
    let argument = node.child_by_field_name("argument")?;
    if argument.kind() != "integer" {
        return None;
    }
    parsed_int(&source[argument.start_byte()..argument.end_byte()])
}
