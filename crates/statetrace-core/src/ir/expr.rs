//! Expressions and storage places.

use ordered_float::OrderedFloat;

use crate::ids::{FieldId, LocalId, MethodId, ParamId};
use crate::tracker::TrackerMember;
use crate::type_hash::TypeHash;
use crate::types::PrimitiveKind;

use super::RefKind;

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Bool(bool),
    /// Integer of the given kind. The value is kept in the kind's range.
    Int {
        value: i128,
        kind: PrimitiveKind,
    },
    Float {
        value: OrderedFloat<f64>,
        kind: PrimitiveKind,
    },
    /// `mantissa * 10^-scale`.
    Decimal {
        mantissa: i128,
        scale: u8,
    },
    Str(String),
    Null,
}

/// A storage location an expression can read, write or take the address of.
///
/// Ref locals and ref parameters read and write through their referent;
/// only [`Expr::RefAssign`] rebinds them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Place {
    Local(LocalId),
    Param(ParamId),
    /// The receiver. Assignable only inside struct constructors.
    This,
    Field {
        receiver: Box<Expr>,
        field: FieldId,
    },
    Element {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    /// The storage a pointer expression points at.
    Deref(Box<Expr>),
}

impl Place {
    /// `this.field`
    pub fn this_field(field: FieldId) -> Self {
        Place::Field {
            receiver: Box::new(Expr::Load(Place::This)),
            field,
        }
    }

    /// `receiver.field`
    pub fn field(receiver: Expr, field: FieldId) -> Self {
        Place::Field {
            receiver: Box::new(receiver),
            field,
        }
    }

    /// `array[index]`
    pub fn element(array: Expr, index: Expr) -> Self {
        Place::Element {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    /// `*pointer`
    pub fn deref(pointer: Expr) -> Self {
        Place::Deref(Box::new(pointer))
    }

    /// Whether reading this place twice is free of side effects.
    pub fn is_pure(&self) -> bool {
        match self {
            Place::Local(_) | Place::Param(_) | Place::This => true,
            Place::Field { receiver, .. } => receiver.is_pure_load(),
            Place::Element { .. } | Place::Deref(_) => false,
        }
    }
}

/// An argument passed to a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    Value(Expr),
    /// Passed by reference; `kind` is never [`RefKind::None`].
    Ref { kind: RefKind, place: Place },
}

impl Arg {
    /// `ref place`
    pub fn by_ref(place: Place) -> Self {
        Arg::Ref {
            kind: RefKind::Ref,
            place,
        }
    }

    /// `out place`
    pub fn out(place: Place) -> Self {
        Arg::Ref {
            kind: RefKind::Out,
            place,
        }
    }
}

/// Runtime helpers the host compiler's other instrumentations call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// Throws if the module's cancellation token was signalled.
    ThrowIfCancellationRequested,
    /// Throws if the stack is close to overflowing.
    EnsureSufficientExecutionStack,
    /// Creates the coverage payload for a method.
    CreateCoveragePayload { method: MethodId },
}

/// What a call invokes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallTarget {
    Method(MethodId),
    Tracker(TrackerMember),
    Intrinsic(Intrinsic),
    /// Virtual `ToString`, optionally constrained to a value type so the
    /// receiver is not boxed.
    ToString { constrained: Option<TypeHash> },
    /// Call through a method pointer or delegate value.
    Indirect(Box<Expr>),
}

/// A call expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub target: CallTarget,
    /// Instance receiver. Struct receivers are passed by reference.
    pub receiver: Option<Arg>,
    pub args: Vec<Arg>,
    /// Result type; `void` when the call produces nothing.
    pub ret: TypeHash,
}

/// A store into a member of a newly created object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberInit {
    pub field: FieldId,
    pub value: Expr,
}

/// Object or struct creation, with optional initializer member stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewObject {
    pub ty: TypeHash,
    pub ctor: Option<MethodId>,
    pub args: Vec<Arg>,
    pub initializers: Vec<MemberInit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
}

/// A conversion applied to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Value conversion; integers wrap to the target width.
    Numeric(PrimitiveKind),
    /// Same-width reinterpretation of the bit pattern.
    Reinterpret(PrimitiveKind),
    /// Box a value-type value as the given type.
    Box(TypeHash),
}

/// An expression in a lowered body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(Constant),
    Load(Place),
    /// Unmanaged address of a place.
    AddressOf(Place),
    /// Store; evaluates to the committed value.
    Assign {
        target: Place,
        value: Box<Expr>,
    },
    /// Rebind a ref local or ref parameter to `source`.
    RefAssign {
        target: Place,
        source: Place,
    },
    Call(Box<Call>),
    New(Box<NewObject>),
    NewArray {
        element: TypeHash,
        len: Box<Expr>,
    },
    /// Pointer to a method, bound to an optional receiver.
    MethodPointer {
        method: MethodId,
        receiver: Option<Box<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Convert {
        conversion: Conversion,
        operand: Box<Expr>,
    },
    SizeOf(TypeHash),
    Default(TypeHash),
    /// Evaluate `effects` in order, then `value` if present.
    Sequence {
        effects: Vec<Expr>,
        value: Option<Box<Expr>>,
    },
    /// `cond ? then : otherwise`; without `otherwise` the expression is void.
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    /// An `int32` literal.
    pub fn int(value: i32) -> Self {
        Self::int_of(value as i128, PrimitiveKind::Int32)
    }

    /// An integer literal of any integral kind.
    pub fn int_of(value: i128, kind: PrimitiveKind) -> Self {
        Expr::Const(Constant::Int { value, kind })
    }

    /// A `uint32` literal, as used for tracker ids and indices.
    pub fn u32(value: u32) -> Self {
        Self::int_of(value as i128, PrimitiveKind::Uint32)
    }

    pub fn bool(value: bool) -> Self {
        Expr::Const(Constant::Bool(value))
    }

    pub fn double(value: f64) -> Self {
        Expr::Const(Constant::Float {
            value: OrderedFloat(value),
            kind: PrimitiveKind::Double,
        })
    }

    pub fn float(value: f32) -> Self {
        Expr::Const(Constant::Float {
            value: OrderedFloat(value as f64),
            kind: PrimitiveKind::Float,
        })
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Const(Constant::Str(value.into()))
    }

    pub fn null() -> Self {
        Expr::Const(Constant::Null)
    }

    pub fn local(id: LocalId) -> Self {
        Expr::Load(Place::Local(id))
    }

    pub fn param(id: ParamId) -> Self {
        Expr::Load(Place::Param(id))
    }

    pub fn this() -> Self {
        Expr::Load(Place::This)
    }

    pub fn assign(target: Place, value: Expr) -> Self {
        Expr::Assign {
            target,
            value: Box::new(value),
        }
    }

    pub fn ref_assign(target: Place, source: Place) -> Self {
        Expr::RefAssign { target, source }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn convert(conversion: Conversion, operand: Expr) -> Self {
        Expr::Convert {
            conversion,
            operand: Box::new(operand),
        }
    }

    /// Static call to a method.
    pub fn call(method: MethodId, args: Vec<Arg>, ret: TypeHash) -> Self {
        Expr::Call(Box::new(Call {
            target: CallTarget::Method(method),
            receiver: None,
            args,
            ret,
        }))
    }

    /// Instance call to a method.
    pub fn call_on(receiver: Arg, method: MethodId, args: Vec<Arg>, ret: TypeHash) -> Self {
        Expr::Call(Box::new(Call {
            target: CallTarget::Method(method),
            receiver: Some(receiver),
            args,
            ret,
        }))
    }

    /// Any call.
    pub fn from_call(call: Call) -> Self {
        Expr::Call(Box::new(call))
    }

    pub fn new_object(ty: TypeHash, ctor: Option<MethodId>, args: Vec<Arg>) -> Self {
        Expr::New(Box::new(NewObject {
            ty,
            ctor,
            args,
            initializers: Vec::new(),
        }))
    }

    /// A sequence whose value is the last expression, or void.
    pub fn sequence(effects: Vec<Expr>, value: Option<Expr>) -> Self {
        Expr::Sequence {
            effects,
            value: value.map(Box::new),
        }
    }

    /// `if (cond) then` as a void expression.
    pub fn when(cond: Expr, then: Expr) -> Self {
        Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: None,
        }
    }

    /// Whether this expression is a load of a local, parameter, or `this`.
    pub fn is_pure_load(&self) -> bool {
        matches!(
            self,
            Expr::Load(Place::Local(_) | Place::Param(_) | Place::This)
        )
    }
}

impl From<Constant> for Expr {
    fn from(constant: Constant) -> Self {
        Expr::Const(constant)
    }
}
