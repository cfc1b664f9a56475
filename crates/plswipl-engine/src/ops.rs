//! Operator table shared by the reader and the term writer.

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Xfx,
    Xfy,
    Yfx,
    Fy,
    Fx,
}

/// A single operator definition.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub priority: u16,
    pub kind: OpType,
}

impl OpDef {
    /// Maximum priority of the left argument.
    pub fn left_max(&self) -> u16 {
        match self.kind {
            OpType::Yfx => self.priority,
            _ => self.priority - 1,
        }
    }

    /// Maximum priority of the right (or only) argument.
    pub fn right_max(&self) -> u16 {
        match self.kind {
            OpType::Xfy | OpType::Fy => self.priority,
            _ => self.priority - 1,
        }
    }
}

const INFIX: &[(&str, u16, OpType)] = &[
    (":-", 1200, OpType::Xfx),
    ("-->", 1200, OpType::Xfx),
    (";", 1100, OpType::Xfy),
    ("|", 1100, OpType::Xfy),
    ("->", 1050, OpType::Xfy),
    ("*->", 1050, OpType::Xfy),
    (",", 1000, OpType::Xfy),
    ("=", 700, OpType::Xfx),
    ("\\=", 700, OpType::Xfx),
    ("==", 700, OpType::Xfx),
    ("\\==", 700, OpType::Xfx),
    ("@<", 700, OpType::Xfx),
    ("@>", 700, OpType::Xfx),
    ("@=<", 700, OpType::Xfx),
    ("@>=", 700, OpType::Xfx),
    ("=..", 700, OpType::Xfx),
    ("is", 700, OpType::Xfx),
    ("=:=", 700, OpType::Xfx),
    ("=\\=", 700, OpType::Xfx),
    ("<", 700, OpType::Xfx),
    (">", 700, OpType::Xfx),
    ("=<", 700, OpType::Xfx),
    (">=", 700, OpType::Xfx),
    (":", 200, OpType::Xfy),
    ("+", 500, OpType::Yfx),
    ("-", 500, OpType::Yfx),
    ("/\\", 500, OpType::Yfx),
    ("\\/", 500, OpType::Yfx),
    ("xor", 500, OpType::Yfx),
    ("*", 400, OpType::Yfx),
    ("/", 400, OpType::Yfx),
    ("//", 400, OpType::Yfx),
    ("mod", 400, OpType::Yfx),
    ("rem", 400, OpType::Yfx),
    ("div", 400, OpType::Yfx),
    ("<<", 400, OpType::Yfx),
    (">>", 400, OpType::Yfx),
    ("**", 200, OpType::Xfx),
    ("^", 200, OpType::Xfy),
];

const PREFIX: &[(&str, u16, OpType)] = &[
    (":-", 1200, OpType::Fx),
    ("?-", 1200, OpType::Fx),
    ("dynamic", 1150, OpType::Fx),
    ("discontiguous", 1150, OpType::Fx),
    ("initialization", 1150, OpType::Fx),
    ("\\+", 900, OpType::Fy),
    ("-", 200, OpType::Fy),
    ("+", 200, OpType::Fy),
    ("\\", 200, OpType::Fy),
];

/// Look up an infix operator.
pub fn infix(name: &str) -> Option<OpDef> {
    INFIX
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, priority, kind)| OpDef { priority, kind })
}

/// Look up a prefix operator.
pub fn prefix(name: &str) -> Option<OpDef> {
    PREFIX
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, priority, kind)| OpDef { priority, kind })
}

/// Whether `name` is any kind of operator.
pub fn is_op(name: &str) -> bool {
    infix(name).is_some() || prefix(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_priorities() {
        let comma = infix(",").unwrap();
        assert_eq!(comma.left_max(), 999);
        assert_eq!(comma.right_max(), 1000);

        let minus = infix("-").unwrap();
        assert_eq!(minus.left_max(), 500);
        assert_eq!(minus.right_max(), 499);

        let neg = prefix("-").unwrap();
        assert_eq!(neg.right_max(), 200);
    }

    #[test]
    fn test_is_op() {
        assert!(is_op("is"));
        assert!(is_op("\\+"));
        assert!(!is_op("foo"));
    }
}
