//! Catalog of interchangeable mutation operations.
//!
//! Every mutable operator or value the indexer knows about is one variant
//! of [`MutationOp`]. Variants are grouped into [`OpGroup`]s of mutually
//! substitutable operations, each tagged with a two-letter category code.
//! The catalog is a process-wide constant, built once and never mutated.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// One mutable operator or value variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MutationOp {
    // Arithmetic binary operators
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    // Bitwise comparison operators
    BitAnd,
    BitOr,
    BitXor,
    // Bitwise shift operators
    LShift,
    RShift,
    // Boolean connectives
    And,
    Or,
    // Ordering and equality comparisons
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    // Identity comparisons
    Is,
    IsNot,
    // Membership comparisons
    In,
    NotIn,
    // Augmented assignment, tagged separately from the plain binary
    // operators because the two spaces overlap
    AugAdd,
    AugSub,
    AugMult,
    AugDiv,
    // Named constant literals
    ConstTrue,
    ConstFalse,
    ConstNone,
    // Conditional-branch tests; IfStatement is the default bucket for any
    // non-literal test and is never itself a substitution target
    IfTrue,
    IfFalse,
    IfStatement,
    // Numeric subscript indices bucketed by sign
    IndexPos,
    IndexZero,
    IndexNeg,
    // Half-bounded slice swaps
    SliceUnboundUpper,
    SliceUnboundLower,
    SliceUnbounded,
    // Slice range narrowing, self-referential: the substitute for the op
    // is the op itself, the transform moves the bound one step toward zero
    SliceUPosToZero,
    SliceUNegToZero,
}

impl MutationOp {
    /// Python source token for operators that substitute as a plain token
    /// swap. Structural variants (slices) rebuild their node text instead
    /// and return `None`.
    pub fn token(&self) -> Option<&'static str> {
        use MutationOp::*;
        Some(match self {
            Add => "+",
            Sub => "-",
            Mult => "*",
            Div => "/",
            FloorDiv => "//",
            Mod => "%",
            Pow => "**",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            LShift => "<<",
            RShift => ">>",
            And => "and",
            Or => "or",
            Eq => "==",
            NotEq => "!=",
            Lt => "<",
            LtE => "<=",
            Gt => ">",
            GtE => ">=",
            Is => "is",
            IsNot => "is not",
            In => "in",
            NotIn => "not in",
            AugAdd => "+=",
            AugSub => "-=",
            AugMult => "*=",
            AugDiv => "/=",
            ConstTrue | IfTrue => "True",
            ConstFalse | IfFalse => "False",
            ConstNone => "None",
            IndexPos => "1",
            IndexZero => "0",
            IndexNeg => "-1",
            IfStatement | SliceUnboundUpper | SliceUnboundLower | SliceUnbounded
            | SliceUPosToZero | SliceUNegToZero => return None,
        })
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MutationOp::*;
        let name = match self {
            Add => "Add",
            Sub => "Sub",
            Mult => "Mult",
            Div => "Div",
            FloorDiv => "FloorDiv",
            Mod => "Mod",
            Pow => "Pow",
            BitAnd => "BitAnd",
            BitOr => "BitOr",
            BitXor => "BitXor",
            LShift => "LShift",
            RShift => "RShift",
            And => "And",
            Or => "Or",
            Eq => "Eq",
            NotEq => "NotEq",
            Lt => "Lt",
            LtE => "LtE",
            Gt => "Gt",
            GtE => "GtE",
            Is => "Is",
            IsNot => "IsNot",
            In => "In",
            NotIn => "NotIn",
            AugAdd => "AugAssign_Add",
            AugSub => "AugAssign_Sub",
            AugMult => "AugAssign_Mult",
            AugDiv => "AugAssign_Div",
            ConstTrue => "True",
            ConstFalse => "False",
            ConstNone => "None",
            IfTrue => "If_True",
            IfFalse => "If_False",
            IfStatement => "If_Statement",
            IndexPos => "Index_NumPos",
            IndexZero => "Index_NumZero",
            IndexNeg => "Index_NumNeg",
            SliceUnboundUpper => "Slice_UnboundUpper",
            SliceUnboundLower => "Slice_UnboundLower",
            SliceUnbounded => "Slice_Unbounded",
            SliceUPosToZero => "Slice_UPosToZero",
            SliceUNegToZero => "Slice_UNegToZero",
        };
        f.write_str(name)
    }
}

/// A named set of mutually substitutable operations with its category code.
#[derive(Debug, Clone, Copy)]
pub struct OpGroup {
    pub name: &'static str,
    pub desc: &'static str,
    pub category: &'static str,
    pub operations: &'static [MutationOp],
}

/// Node-class tag to two-letter category code.
pub const CATEGORIES: &[(&str, &str)] = &[
    ("AugAssign", "aa"),
    ("BinOp", "bn"),
    ("BinOpBC", "bc"),
    ("BinOpBS", "bs"),
    ("BoolOp", "bl"),
    ("Compare", "cp"),
    ("CompareIn", "cn"),
    ("CompareIs", "cs"),
    ("If", "if"),
    ("Index", "ix"),
    ("NameConstant", "nc"),
    ("SliceUS", "su"),
    ("SliceRC", "sr"),
];

/// All operation sets that are sensible substitutes for each other.
pub const OP_GROUPS: &[OpGroup] = &[
    OpGroup {
        name: "AugAssign",
        desc: "Augmented assignment e.g. += -= /= *=",
        category: "aa",
        operations: &[
            MutationOp::AugAdd,
            MutationOp::AugSub,
            MutationOp::AugMult,
            MutationOp::AugDiv,
        ],
    },
    OpGroup {
        name: "BinOp",
        desc: "Binary operations e.g. + - * / %",
        category: "bn",
        operations: &[
            MutationOp::Add,
            MutationOp::Sub,
            MutationOp::Div,
            MutationOp::Mult,
            MutationOp::Pow,
            MutationOp::Mod,
            MutationOp::FloorDiv,
        ],
    },
    OpGroup {
        name: "BinOp Bit Comparison",
        desc: "Bitwise comparison operations e.g. x & y, x | y, x ^ y",
        category: "bc",
        operations: &[MutationOp::BitAnd, MutationOp::BitOr, MutationOp::BitXor],
    },
    OpGroup {
        name: "BinOp Bit Shifts",
        desc: "Bitwise shift operations e.g. << >>",
        category: "bs",
        operations: &[MutationOp::LShift, MutationOp::RShift],
    },
    OpGroup {
        name: "BoolOp",
        desc: "Boolean operations e.g. and or",
        category: "bl",
        operations: &[MutationOp::And, MutationOp::Or],
    },
    OpGroup {
        name: "Compare",
        desc: "Comparison operations e.g. == >= <= > <",
        category: "cp",
        operations: &[
            MutationOp::Eq,
            MutationOp::NotEq,
            MutationOp::Lt,
            MutationOp::LtE,
            MutationOp::Gt,
            MutationOp::GtE,
        ],
    },
    OpGroup {
        name: "Compare In",
        desc: "Compare membership e.g. in, not in",
        category: "cn",
        operations: &[MutationOp::In, MutationOp::NotIn],
    },
    OpGroup {
        name: "Compare Is",
        desc: "Compare identity e.g. is, is not",
        category: "cs",
        operations: &[MutationOp::Is, MutationOp::IsNot],
    },
    OpGroup {
        name: "If",
        desc: "If statement tests e.g. original statement, True, False",
        category: "if",
        operations: &[
            MutationOp::IfTrue,
            MutationOp::IfFalse,
            MutationOp::IfStatement,
        ],
    },
    OpGroup {
        name: "Index",
        desc: "Index values for iterables e.g. i[-1], i[0], i[0][1]",
        category: "ix",
        operations: &[
            MutationOp::IndexPos,
            MutationOp::IndexZero,
            MutationOp::IndexNeg,
        ],
    },
    OpGroup {
        name: "NameConstant",
        desc: "Named constant mutations e.g. True, False, None",
        category: "nc",
        operations: &[
            MutationOp::ConstTrue,
            MutationOp::ConstFalse,
            MutationOp::ConstNone,
        ],
    },
    OpGroup {
        name: "Slice Unbounded Swap",
        desc: "Slice mutations to swap lower/upper values, x[2:] (unbound upper) \
               to x[:2] (unbound lower). Steps are not changed.",
        category: "su",
        operations: &[
            MutationOp::SliceUnboundUpper,
            MutationOp::SliceUnboundLower,
            MutationOp::SliceUnbounded,
        ],
    },
    OpGroup {
        name: "Slice Range Change",
        desc: "Slice range changes e.g. x[1:5] to x[1:4].",
        category: "sr",
        operations: &[MutationOp::SliceUPosToZero, MutationOp::SliceUNegToZero],
    },
];

/// Two-letter category code for a location-index node class.
pub fn category_code(ast_class: &str) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(class, _)| *class == ast_class)
        .map(|(_, code)| *code)
}

/// True when `code` is a known two-letter category code.
pub fn is_valid_code(code: &str) -> bool {
    CATEGORIES.iter().any(|(_, c)| *c == code)
}

/// All known two-letter category codes.
pub fn valid_codes() -> BTreeSet<&'static str> {
    CATEGORIES.iter().map(|(_, c)| *c).collect()
}

/// The set of operations `target_op` may be mutated into.
///
/// The target's own operation is excluded, with two special policies:
/// the slice range-change operations are self-referential (applying the
/// narrowing transform is the mutation, so the op maps to itself), and
/// the generic `If_Statement` bucket is stripped because it is a default
/// classification, never a substitution target.
pub fn substitutes_for(target_op: MutationOp) -> BTreeSet<MutationOp> {
    let mut subs = BTreeSet::new();

    for group in OP_GROUPS {
        if !group.operations.contains(&target_op) {
            continue;
        }
        subs.extend(group.operations.iter().copied());
        subs.remove(&target_op);

        if matches!(
            target_op,
            MutationOp::SliceUPosToZero | MutationOp::SliceUNegToZero
        ) {
            subs.clear();
            subs.insert(target_op);
        }

        subs.remove(&MutationOp::IfStatement);
        break;
    }

    subs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_in_exactly_one_group() {
        let mut seen = BTreeSet::new();
        for group in OP_GROUPS {
            for op in group.operations {
                assert!(seen.insert(*op), "{op} appears in more than one group");
            }
        }
    }

    #[test]
    fn category_codes_are_unique() {
        let codes: BTreeSet<_> = CATEGORIES.iter().map(|(_, c)| c).collect();
        assert_eq!(codes.len(), CATEGORIES.len());
    }

    #[test]
    fn group_categories_are_known_codes() {
        for group in OP_GROUPS {
            assert!(is_valid_code(group.category), "{}", group.category);
        }
    }
}
