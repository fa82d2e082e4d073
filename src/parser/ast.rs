use serde::{Deserialize, Serialize};
use std::fmt;

/// Complete parsed program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Top-level statements in source order
    pub body: Vec<Statement>,
    /// Lines the parser skipped
    pub warnings: Vec<ParseWarning>,
}

impl Program {
    /// Number of tree nodes (statements and expressions) in the program
    pub fn node_count(&self) -> usize {
        1 + self.body.iter().map(Statement::node_count).sum::<usize>()
    }
}

/// A line the parser could not recognize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-indexed source line
    pub line: usize,
    /// Statement text as seen by the parser
    pub text: String,
    /// Why the line was skipped
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.message, self.text)
    }
}

/// Declaration keyword of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclarationKind {
    /// `var`
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
    /// Name bound by a `function` declaration
    Function,
}

impl DeclarationKind {
    /// Parses a declaration keyword
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "var" => Some(DeclarationKind::Var),
            "let" => Some(DeclarationKind::Let),
            "const" => Some(DeclarationKind::Const),
            _ => None,
        }
    }
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `let x = expr`
    VariableDeclaration {
        /// Declaration keyword
        kind: DeclarationKind,
        /// Declared name
        name: String,
        /// Initializer, if any
        init: Option<Expression>,
    },

    /// `function name(params) { ... }`
    FunctionDeclaration {
        /// Function name
        name: String,
        /// Parameter names in order
        params: Vec<String>,
        /// Body statements
        body: Vec<Statement>,
    },

    /// `if (test) { ... } else { ... }`
    IfStatement {
        /// Condition expression
        test: Expression,
        /// Statements run when the condition holds
        consequent: Vec<Statement>,
        /// Statements run otherwise
        alternate: Option<Vec<Statement>>,
    },

    /// `for (init; test; update) { ... }`
    ForStatement {
        /// Loop initializer
        init: Option<Box<Statement>>,
        /// Loop condition
        test: Option<Expression>,
        /// Expression run after each iteration
        update: Option<Expression>,
        /// Loop body
        body: Vec<Statement>,
    },

    /// `return expr` or bare `return`
    ReturnStatement {
        /// Returned value
        argument: Option<Expression>,
    },

    /// Call, assignment or update used as a statement
    ExpressionStatement(Expression),
}

impl Statement {
    fn node_count(&self) -> usize {
        match self {
            Statement::VariableDeclaration { init, .. } => {
                1 + init.as_ref().map_or(0, Expression::node_count)
            }
            Statement::FunctionDeclaration { body, .. } => {
                1 + body.iter().map(Statement::node_count).sum::<usize>()
            }
            Statement::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                1 + test.node_count()
                    + consequent.iter().map(Statement::node_count).sum::<usize>()
                    + alternate
                        .iter()
                        .flatten()
                        .map(Statement::node_count)
                        .sum::<usize>()
            }
            Statement::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                1 + init.as_ref().map_or(0, |s| s.node_count())
                    + test.as_ref().map_or(0, Expression::node_count)
                    + update.as_ref().map_or(0, Expression::node_count)
                    + body.iter().map(Statement::node_count).sum::<usize>()
            }
            Statement::ReturnStatement { argument } => {
                1 + argument.as_ref().map_or(0, Expression::node_count)
            }
            Statement::ExpressionStatement(expr) => 1 + expr.node_count(),
        }
    }
}

/// Literal values as written in source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// Quoted string
    Str(String),
    /// `true` / `false`
    Bool(bool),
    /// `null` / `undefined`
    Null,
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Literal value
    Literal(Literal),

    /// Variable reference
    Identifier(String),

    /// Arithmetic or comparison: `left op right`
    Binary {
        /// Operator
        operator: BinaryOperator,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },

    /// `left && right` / `left || right`
    Logical {
        /// Operator (`And` or `Or`)
        operator: BinaryOperator,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },

    /// `callee(args)`
    Call {
        /// Callee, an identifier or member expression
        callee: Box<Expression>,
        /// Arguments in order
        arguments: Vec<Expression>,
    },

    /// `object.property`
    Member {
        /// Object being accessed
        object: Box<Expression>,
        /// Property name
        property: String,
    },

    /// `[a, b, c]`
    Array(Vec<Expression>),

    /// `name = value`, `name += value`, ...
    Assignment {
        /// Assignment operator
        operator: AssignmentOperator,
        /// Assigned name
        target: String,
        /// Assigned value
        value: Box<Expression>,
    },

    /// `name++`, `--name`, ...
    Update {
        /// Increment or decrement
        operator: UpdateOperator,
        /// Updated name
        target: String,
        /// Whether the operator precedes the name
        prefix: bool,
    },
}

impl Expression {
    fn node_count(&self) -> usize {
        match self {
            Expression::Literal(_) | Expression::Identifier(_) | Expression::Update { .. } => 1,
            Expression::Binary { left, right, .. } | Expression::Logical { left, right, .. } => {
                1 + left.node_count() + right.node_count()
            }
            Expression::Call { callee, arguments } => {
                1 + callee.node_count() + arguments.iter().map(Expression::node_count).sum::<usize>()
            }
            Expression::Member { object, .. } => 1 + object.node_count(),
            Expression::Array(elements) => {
                1 + elements.iter().map(Expression::node_count).sum::<usize>()
            }
            Expression::Assignment { value, .. } => 1 + value.node_count(),
        }
    }

    /// Dotted name of an identifier or member chain (`console.log`), if it is one
    pub fn qualified_name(&self) -> Option<String> {
        match self {
            Expression::Identifier(name) => Some(name.clone()),
            Expression::Member { object, property } => {
                object.qualified_name().map(|base| format!("{}.{}", base, property))
            }
            _ => None,
        }
    }
}

/// Binary and logical operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Arithmetic
    /// Addition operator (+)
    Add,
    /// Subtraction operator (-)
    Sub,
    /// Multiplication operator (*)
    Mul,
    /// Division operator (/)
    Div,
    /// Modulo operator (%)
    Mod,

    // Comparison
    /// Equality operator (== and ===)
    Eq,
    /// Inequality operator (!= and !==)
    NotEq,
    /// Less than operator (<)
    Lt,
    /// Greater than operator (>)
    Gt,
    /// Less than or equal operator (<=)
    LtEq,
    /// Greater than or equal operator (>=)
    GtEq,

    // Logical
    /// Logical AND operator (&&)
    And,
    /// Logical OR operator (||)
    Or,
}

impl BinaryOperator {
    /// Operator token table, longest tokens first so `===` wins over `==`
    pub const TOKENS: &'static [(&'static str, BinaryOperator)] = &[
        ("===", BinaryOperator::Eq),
        ("!==", BinaryOperator::NotEq),
        ("==", BinaryOperator::Eq),
        ("!=", BinaryOperator::NotEq),
        ("<=", BinaryOperator::LtEq),
        (">=", BinaryOperator::GtEq),
        ("&&", BinaryOperator::And),
        ("||", BinaryOperator::Or),
        ("+", BinaryOperator::Add),
        ("-", BinaryOperator::Sub),
        ("*", BinaryOperator::Mul),
        ("/", BinaryOperator::Div),
        ("%", BinaryOperator::Mod),
        ("<", BinaryOperator::Lt),
        (">", BinaryOperator::Gt),
    ];

    /// Whether this is `&&` or `||`
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    /// Source symbol
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Eq => "==",
            BinaryOperator::NotEq => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Gt => ">",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentOperator {
    /// `=`
    Assign,
    /// `+=`
    AddAssign,
    /// `-=`
    SubAssign,
    /// `*=`
    MulAssign,
    /// `/=`
    DivAssign,
    /// `%=`
    ModAssign,
}

impl AssignmentOperator {
    /// Parses an assignment operator token
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "=" => Some(AssignmentOperator::Assign),
            "+=" => Some(AssignmentOperator::AddAssign),
            "-=" => Some(AssignmentOperator::SubAssign),
            "*=" => Some(AssignmentOperator::MulAssign),
            "/=" => Some(AssignmentOperator::DivAssign),
            "%=" => Some(AssignmentOperator::ModAssign),
            _ => None,
        }
    }

    /// Binary operator a compound assignment applies, `None` for plain `=`
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        match self {
            AssignmentOperator::Assign => None,
            AssignmentOperator::AddAssign => Some(BinaryOperator::Add),
            AssignmentOperator::SubAssign => Some(BinaryOperator::Sub),
            AssignmentOperator::MulAssign => Some(BinaryOperator::Mul),
            AssignmentOperator::DivAssign => Some(BinaryOperator::Div),
            AssignmentOperator::ModAssign => Some(BinaryOperator::Mod),
        }
    }
}

/// `++` / `--`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOperator {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}
