//! Abstract syntax tree definitions consumed by the evaluator.
//!
//! The lexer and parser that produce these nodes live outside this crate;
//! this module only pins down the node taxonomy the evaluator accepts as
//! input, mirrored on the shape of `riptide_syntax::ast` but generalized to
//! the pipe-chain language described in the runtime spec.

/// A position in a source file. Line and column begin at 1.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

/// A span of source between two positions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Location {
    pub start: Position,
    pub end: Position,
}

/// A top-level or nested statement: an optionally-annotated pipe chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub annotations: Vec<AnnotationEntry>,
    pub chain: PipeChain,
    pub location: Location,
}

/// One entry in a statement's annotation list: `^(name: expr, ...spread)`.
#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationEntry {
    Named(String, Expr),
    Spread(Expr),
}

/// `head ( -> target )* terminator?`
#[derive(Clone, Debug, PartialEq)]
pub struct PipeChain {
    pub head: Box<Expr>,
    pub targets: Vec<PipeTarget>,
    pub terminator: Option<Terminator>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    Break,
    Return,
    Capture {
        name: String,
        type_name: Option<String>,
    },
}

/// A pipe target: something a value can be threaded into after `->`.
#[derive(Clone, Debug, PartialEq)]
pub enum PipeTarget {
    Capture {
        name: String,
        type_name: Option<String>,
    },
    HostCall(Call),
    ClosureCall(Call),
    PipeInvoke(Vec<CallArg>),
    MethodCall(MethodCall),
    Conditional(Conditional),
    Loop(Loop),
    DoWhile(DoWhile),
    Block(Block),
    StringLit(InterpString),
    Grouped(Box<PipeChain>),
    ClosureChain(ClosureNode),
    Destructure(Pattern),
    Slice(SliceSpec),
    Spread,
    TypeAssertion(String),
    TypeCheck(String),
    Each(CollectionOp),
    Map(CollectionOp),
    Fold(CollectionOp),
    Filter(CollectionOp),
}

/// The head or any non-pipe sub-expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    StringLit(InterpString),
    Arithmetic(BinOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Primary(Primary),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Primary {
    StringLit(InterpString),
    Number(f64),
    Bool(bool),
    Tuple(TupleLit),
    Dict(DictLit),
    Closure(ClosureNode),
    Variable(Variable),
    HostCall(Call),
    ClosureCall(Call),
    MethodCallHead(MethodCall),
    Conditional(Conditional),
    Loop(Loop),
    Block(Block),
    Grouped(Box<PipeChain>),
    Spread(Box<Expr>),
    TypeAssertion { expr: Box<Expr>, type_name: String },
    TypeCheck { expr: Box<Expr>, type_name: String },
}

/// `name(args...)` — used for both host calls and named-closure calls; which
/// one a name resolves to is a runtime decision, not a parse-time one.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<CallArg>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub name: String,
    pub args: Vec<CallArg>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallArg {
    Expr(Expr),
    Spread(Expr),
}

/// A variable reference with its access chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub chain: Vec<AccessStep>,
    pub default: Option<Box<Expr>>,
    /// Set when this variable reference is an existence check (`.?field`)
    /// rather than a normal resolution. `Some(None)` is a bare `.?field`;
    /// `Some(Some(ty))` is `.?field&type`.
    pub existence_check: Option<Option<String>>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AccessStep {
    Field(FieldAccess),
    Index(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldAccess {
    Name(String),
    Named(String),
    Alternatives(Vec<String>),
    Computed(Box<Expr>),
    Block(Block),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_name: Option<String>,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClosureNode {
    pub params: Vec<Param>,
    pub body: Block,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Conditional {
    pub condition: Option<Box<Expr>>,
    pub then_branch: Box<Block>,
    pub else_branch: Option<Box<Block>>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Loop {
    pub input: Option<Box<Expr>>,
    pub body: Box<Block>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoWhile {
    pub body: Box<Block>,
    pub condition: Box<Expr>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Positional(Vec<PatternElem>),
    Keyed(Vec<(String, String)>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatternElem {
    Skip,
    Bind(String),
    Nested(Box<Pattern>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SliceSpec {
    pub start: Option<Box<Expr>>,
    pub stop: Option<Box<Expr>>,
    pub step: Option<Box<Expr>>,
}

/// Shared shape for `each` / `map` / `fold` / `filter` bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionOp {
    pub body: CollectionBody,
    pub initial: Option<Box<Expr>>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CollectionBody {
    InlineClosure(ClosureNode),
    Block(Block),
    Grouped(Box<Expr>),
    Variable(Box<Variable>),
    Postfix(Box<Expr>),
    Spread(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TupleLit {
    pub entries: Vec<TupleEntry>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TupleEntry {
    Positional(Expr),
    Named(String, Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DictLit {
    pub entries: Vec<(Expr, Expr)>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterpString {
    pub parts: Vec<StringPart>,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StringPart {
    Literal(String),
    Interp(Box<Expr>),
}

/// Structural equality ignoring `Location` fields, used to compare closure
/// bodies for `deep_equals` (spec §4.1: script callables compare equal iff
/// their body ASTs are structurally identical ignoring source locations).
pub fn blocks_structurally_eq(a: &Block, b: &Block) -> bool {
    a.statements.len() == b.statements.len()
        && a.statements.iter().zip(&b.statements).all(|(x, y)| statements_eq(x, y))
}

fn statements_eq(a: &Statement, b: &Statement) -> bool {
    a.annotations.len() == b.annotations.len()
        && a.annotations.iter().zip(&b.annotations).all(|(x, y)| annotation_entries_eq(x, y))
        && pipe_chains_eq(&a.chain, &b.chain)
}

fn annotation_entries_eq(a: &AnnotationEntry, b: &AnnotationEntry) -> bool {
    match (a, b) {
        (AnnotationEntry::Named(n1, e1), AnnotationEntry::Named(n2, e2)) => n1 == n2 && exprs_eq(e1, e2),
        (AnnotationEntry::Spread(e1), AnnotationEntry::Spread(e2)) => exprs_eq(e1, e2),
        _ => false,
    }
}

fn pipe_chains_eq(a: &PipeChain, b: &PipeChain) -> bool {
    exprs_eq(&a.head, &b.head)
        && a.targets.len() == b.targets.len()
        && a.targets.iter().zip(&b.targets).all(|(x, y)| pipe_targets_eq(x, y))
        && a.terminator == b.terminator
}

fn pipe_targets_eq(a: &PipeTarget, b: &PipeTarget) -> bool {
    use PipeTarget::*;
    match (a, b) {
        (Capture { name: n1, type_name: t1 }, Capture { name: n2, type_name: t2 }) => n1 == n2 && t1 == t2,
        (HostCall(c1), HostCall(c2)) | (ClosureCall(c1), ClosureCall(c2)) => calls_eq(c1, c2),
        (PipeInvoke(a1), PipeInvoke(a2)) => call_args_eq(a1, a2),
        (MethodCall(m1), MethodCall(m2)) => {
            m1.name == m2.name && call_args_eq(&m1.args, &m2.args)
        }
        (Conditional(c1), Conditional(c2)) => conditionals_eq(c1, c2),
        (Loop(l1), Loop(l2)) => loops_eq(l1, l2),
        (DoWhile(d1), DoWhile(d2)) => {
            blocks_structurally_eq(&d1.body, &d2.body) && exprs_eq(&d1.condition, &d2.condition)
        }
        (Block(b1), Block(b2)) => blocks_structurally_eq(b1, b2),
        (StringLit(s1), StringLit(s2)) => interp_strings_eq(s1, s2),
        (Grouped(g1), Grouped(g2)) => pipe_chains_eq(g1, g2),
        (ClosureChain(c1), ClosureChain(c2)) => closures_eq(c1, c2),
        (Destructure(p1), Destructure(p2)) => patterns_eq(p1, p2),
        (Slice(s1), Slice(s2)) => slices_eq(s1, s2),
        (Spread, Spread) => true,
        (TypeAssertion(t1), TypeAssertion(t2)) | (TypeCheck(t1), TypeCheck(t2)) => t1 == t2,
        (Each(c1), Each(c2)) | (Map(c1), Map(c2)) | (Fold(c1), Fold(c2)) | (Filter(c1), Filter(c2)) => {
            collection_ops_eq(c1, c2)
        }
        _ => false,
    }
}

fn calls_eq(a: &Call, b: &Call) -> bool {
    a.name == b.name && call_args_eq(&a.args, &b.args)
}

fn call_args_eq(a: &[CallArg], b: &[CallArg]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| match (x, y) {
            (CallArg::Expr(e1), CallArg::Expr(e2)) => exprs_eq(e1, e2),
            (CallArg::Spread(e1), CallArg::Spread(e2)) => exprs_eq(e1, e2),
            _ => false,
        })
}

fn conditionals_eq(a: &Conditional, b: &Conditional) -> bool {
    opt_exprs_eq(&a.condition, &b.condition)
        && blocks_structurally_eq(&a.then_branch, &b.then_branch)
        && match (&a.else_branch, &b.else_branch) {
            (Some(x), Some(y)) => blocks_structurally_eq(x, y),
            (None, None) => true,
            _ => false,
        }
}

fn loops_eq(a: &Loop, b: &Loop) -> bool {
    opt_exprs_eq(&a.input, &b.input) && blocks_structurally_eq(&a.body, &b.body)
}

fn opt_exprs_eq(a: &Option<Box<Expr>>, b: &Option<Box<Expr>>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => exprs_eq(x, y),
        (None, None) => true,
        _ => false,
    }
}

fn patterns_eq(a: &Pattern, b: &Pattern) -> bool {
    match (a, b) {
        (Pattern::Positional(x), Pattern::Positional(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(pattern_elems_eq)
        }
        (Pattern::Keyed(x), Pattern::Keyed(y)) => x == y,
        _ => false,
    }
}

fn pattern_elems_eq((a, b): (&PatternElem, &PatternElem)) -> bool {
    match (a, b) {
        (PatternElem::Skip, PatternElem::Skip) => true,
        (PatternElem::Bind(x), PatternElem::Bind(y)) => x == y,
        (PatternElem::Nested(x), PatternElem::Nested(y)) => patterns_eq(x, y),
        _ => false,
    }
}

fn slices_eq(a: &SliceSpec, b: &SliceSpec) -> bool {
    opt_exprs_eq(&a.start, &b.start) && opt_exprs_eq(&a.stop, &b.stop) && opt_exprs_eq(&a.step, &b.step)
}

fn collection_ops_eq(a: &CollectionOp, b: &CollectionOp) -> bool {
    opt_exprs_eq(&a.initial, &b.initial)
        && match (&a.body, &b.body) {
            (CollectionBody::InlineClosure(x), CollectionBody::InlineClosure(y)) => closures_eq(x, y),
            (CollectionBody::Block(x), CollectionBody::Block(y)) => blocks_structurally_eq(x, y),
            (CollectionBody::Grouped(x), CollectionBody::Grouped(y)) => exprs_eq(x, y),
            (CollectionBody::Variable(x), CollectionBody::Variable(y)) => variables_eq(x, y),
            (CollectionBody::Postfix(x), CollectionBody::Postfix(y)) => exprs_eq(x, y),
            (CollectionBody::Spread(x), CollectionBody::Spread(y)) => exprs_eq(x, y),
            _ => false,
        }
}

fn closures_eq(a: &ClosureNode, b: &ClosureNode) -> bool {
    a.params.len() == b.params.len()
        && a.params.iter().zip(&b.params).all(|(x, y)| {
            x.name == y.name
                && x.type_name == y.type_name
                && match (&x.default, &y.default) {
                    (Some(e1), Some(e2)) => exprs_eq(e1, e2),
                    (None, None) => true,
                    _ => false,
                }
        })
        && blocks_structurally_eq(&a.body, &b.body)
}

fn variables_eq(a: &Variable, b: &Variable) -> bool {
    a.name == b.name
        && a.chain.len() == b.chain.len()
        && a.chain.iter().zip(&b.chain).all(|(x, y)| access_steps_eq(x, y))
        && opt_exprs_eq(&a.default, &b.default)
        && a.existence_check == b.existence_check
}

fn access_steps_eq(a: &AccessStep, b: &AccessStep) -> bool {
    match (a, b) {
        (AccessStep::Field(x), AccessStep::Field(y)) => field_accesses_eq(x, y),
        (AccessStep::Index(x), AccessStep::Index(y)) => exprs_eq(x, y),
        _ => false,
    }
}

fn field_accesses_eq(a: &FieldAccess, b: &FieldAccess) -> bool {
    match (a, b) {
        (FieldAccess::Name(x), FieldAccess::Name(y)) => x == y,
        (FieldAccess::Named(x), FieldAccess::Named(y)) => x == y,
        (FieldAccess::Alternatives(x), FieldAccess::Alternatives(y)) => x == y,
        (FieldAccess::Computed(x), FieldAccess::Computed(y)) => exprs_eq(x, y),
        (FieldAccess::Block(x), FieldAccess::Block(y)) => blocks_structurally_eq(x, y),
        _ => false,
    }
}

fn interp_strings_eq(a: &InterpString, b: &InterpString) -> bool {
    a.parts.len() == b.parts.len()
        && a.parts.iter().zip(&b.parts).all(|(x, y)| match (x, y) {
            (StringPart::Literal(s1), StringPart::Literal(s2)) => s1 == s2,
            (StringPart::Interp(e1), StringPart::Interp(e2)) => exprs_eq(e1, e2),
            _ => false,
        })
}

pub fn exprs_eq(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Number(x), Expr::Number(y)) => x == y,
        (Expr::Bool(x), Expr::Bool(y)) => x == y,
        (Expr::StringLit(x), Expr::StringLit(y)) => interp_strings_eq(x, y),
        (Expr::Arithmetic(o1, l1, r1), Expr::Arithmetic(o2, l2, r2)) => {
            o1 == o2 && exprs_eq(l1, l2) && exprs_eq(r1, r2)
        }
        (Expr::Negate(x), Expr::Negate(y)) => exprs_eq(x, y),
        (Expr::Compare(o1, l1, r1), Expr::Compare(o2, l2, r2)) => {
            o1 == o2 && exprs_eq(l1, l2) && exprs_eq(r1, r2)
        }
        (Expr::Logical(o1, l1, r1), Expr::Logical(o2, l2, r2)) => {
            o1 == o2 && exprs_eq(l1, l2) && exprs_eq(r1, r2)
        }
        (Expr::Not(x), Expr::Not(y)) => exprs_eq(x, y),
        (Expr::Primary(x), Expr::Primary(y)) => primaries_eq(x, y),
        _ => false,
    }
}

fn primaries_eq(a: &Primary, b: &Primary) -> bool {
    use Primary::*;
    match (a, b) {
        (StringLit(x), StringLit(y)) => interp_strings_eq(x, y),
        (Number(x), Number(y)) => x == y,
        (Bool(x), Bool(y)) => x == y,
        (Tuple(x), Tuple(y)) => tuple_lits_eq(x, y),
        (Dict(x), Dict(y)) => dict_lits_eq(x, y),
        (Closure(x), Closure(y)) => closures_eq(x, y),
        (Variable(x), Variable(y)) => variables_eq(x, y),
        (HostCall(x), HostCall(y)) | (ClosureCall(x), ClosureCall(y)) => calls_eq(x, y),
        (MethodCallHead(x), MethodCallHead(y)) => x.name == y.name && call_args_eq(&x.args, &y.args),
        (Conditional(x), Conditional(y)) => conditionals_eq(x, y),
        (Loop(x), Loop(y)) => loops_eq(x, y),
        (Block(x), Block(y)) => blocks_structurally_eq(x, y),
        (Grouped(x), Grouped(y)) => pipe_chains_eq(x, y),
        (Spread(x), Spread(y)) => exprs_eq(x, y),
        (TypeAssertion { expr: e1, type_name: t1 }, TypeAssertion { expr: e2, type_name: t2 }) => {
            t1 == t2 && exprs_eq(e1, e2)
        }
        (TypeCheck { expr: e1, type_name: t1 }, TypeCheck { expr: e2, type_name: t2 }) => {
            t1 == t2 && exprs_eq(e1, e2)
        }
        _ => false,
    }
}

fn tuple_lits_eq(a: &TupleLit, b: &TupleLit) -> bool {
    a.entries.len() == b.entries.len()
        && a.entries.iter().zip(&b.entries).all(|(x, y)| match (x, y) {
            (TupleEntry::Positional(e1), TupleEntry::Positional(e2)) => exprs_eq(e1, e2),
            (TupleEntry::Named(n1, e1), TupleEntry::Named(n2, e2)) => n1 == n2 && exprs_eq(e1, e2),
            _ => false,
        })
}

fn dict_lits_eq(a: &DictLit, b: &DictLit) -> bool {
    a.entries.len() == b.entries.len()
        && a.entries
            .iter()
            .zip(&b.entries)
            .all(|((k1, v1), (k2, v2))| exprs_eq(k1, k2) && exprs_eq(v1, v2))
}
