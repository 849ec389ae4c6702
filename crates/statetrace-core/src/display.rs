//! Deterministic text rendering of lowered bodies.
//!
//! Locals, parameters, fields, types and methods are printed by name, so the
//! output reads close to source:
//!
//! ```text
//! method F(p: int32) -> void
//!   local a: int32
//!   local $tracker: LocalStoreTracker [tracker]
//! {
//!   $tracker = Tracker::LogMethodEntry(1u32);
//!   try {
//!     seq(a = 1, $tracker.LogLocalStore<u32>(reinterpret<uint32>(a), 0u32));
//!   } finally {
//!     $tracker.LogReturn();
//!   }
//! }
//! ```

use std::fmt::Write;

use crate::ids::MethodId;
use crate::ir::{
    Arg, BinaryOp, Call, CallTarget, Constant, Conversion, Expr, Intrinsic, LocalKind,
    MethodDecl, Module, Place, RefKind, Stmt, StmtKind, UnaryOp,
};
use crate::tracker::TrackerMember;
use crate::types::PrimitiveKind;

/// Renders one method of a module.
pub struct IrPrinter<'a> {
    module: &'a Module,
    method: &'a MethodDecl,
    out: String,
    indent: usize,
}

impl<'a> IrPrinter<'a> {
    pub fn new(module: &'a Module, method: &'a MethodDecl) -> Self {
        Self {
            module,
            method,
            out: String::new(),
            indent: 0,
        }
    }

    /// Render the declaration header, locals and body.
    pub fn print_method(mut self) -> String {
        let method = self.method;
        let _ = write!(self.out, "method {}(", method.name);
        for (i, param) in method.params.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let prefix = ref_prefix(param.ref_kind);
            let ty = self.module.types.name_of(param.ty);
            let _ = write!(self.out, "{prefix}{}: {ty}", param.name);
        }
        let ret = self.module.types.name_of(method.return_type);
        let _ = writeln!(self.out, ") -> {ret}");
        for local in &method.locals {
            let ty = self.module.types.name_of(local.ty);
            let r = if local.is_ref { "ref " } else { "" };
            let tag = match local.kind {
                LocalKind::User => "",
                LocalKind::Synthesized => " [synthesized]",
                LocalKind::Tracker => " [tracker]",
            };
            let _ = writeln!(self.out, "  local {r}{}: {ty}{tag}", local.name);
        }
        match &method.body {
            Some(body) => self.print_block_of(body),
            None => self.out.push_str("abstract\n"),
        }
        self.out
    }

    /// Render only the body.
    pub fn print_body(mut self) -> String {
        let method = self.method;
        if let Some(body) = &method.body {
            self.print_block_of(body);
        }
        self.out
    }

    // ==========================================================================
    // Statements
    // ==========================================================================

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Print `{`, the statement's contents, `}` at the current indent.
    fn print_block_of(&mut self, stmt: &Stmt) {
        self.line("{");
        self.print_inner(stmt);
        self.line("}");
    }

    fn print_inner(&mut self, stmt: &Stmt) {
        self.indent += 1;
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.print_stmt(s);
                }
            }
            _ => self.print_stmt(stmt),
        }
        self.indent -= 1;
    }

    fn print_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Nop => self.line("nop;"),
            StmtKind::Expr(e) => {
                let text = format!("{};", self.expr(e));
                self.line(&text);
            }
            StmtKind::Block(_) => self.print_block_of(stmt),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let text = format!("if ({}) {{", self.expr(cond));
                self.line(&text);
                self.print_inner(then);
                if let Some(otherwise) = otherwise {
                    self.line("} else {");
                    self.print_inner(otherwise);
                }
                self.line("}");
            }
            StmtKind::While { cond, body } => {
                let text = format!("while ({}) {{", self.expr(cond));
                self.line(&text);
                self.print_inner(body);
                self.line("}");
            }
            StmtKind::Switch {
                scrutinee,
                cases,
                default,
            } => {
                let text = format!("switch ({}) {{", self.expr(scrutinee));
                self.line(&text);
                self.indent += 1;
                for case in cases {
                    self.line(&format!("case {}: {{", case.value));
                    self.print_inner(&case.body);
                    self.line("}");
                }
                if let Some(default) = default {
                    self.line("default: {");
                    self.print_inner(default);
                    self.line("}");
                }
                self.indent -= 1;
                self.line("}");
            }
            StmtKind::Try(region) => {
                self.line("try {");
                self.print_inner(&region.body);
                for catch in &region.catches {
                    let mut head = String::from("} catch");
                    if catch.exception_type.is_some() || catch.local.is_some() {
                        head.push_str(" (");
                        if let Some(ty) = catch.exception_type {
                            head.push_str(&self.module.types.name_of(ty));
                        }
                        if let Some(local) = catch.local {
                            if catch.exception_type.is_some() {
                                head.push(' ');
                            }
                            head.push_str(&self.place(&Place::Local(local)));
                        }
                        head.push(')');
                    }
                    if let Some(filter) = &catch.filter {
                        let _ = write!(head, " when ({})", self.expr(filter));
                    }
                    head.push_str(" {");
                    self.line(&head);
                    self.print_inner(&catch.body);
                }
                if let Some(finally) = &region.finally {
                    self.line("} finally {");
                    self.print_inner(finally);
                }
                self.line("}");
            }
            StmtKind::Throw(None) => self.line("throw;"),
            StmtKind::Throw(Some(e)) => {
                let text = format!("throw {};", self.expr(e));
                self.line(&text);
            }
            StmtKind::Return(None) => self.line("return;"),
            StmtKind::Return(Some(e)) => {
                let text = format!("return {};", self.expr(e));
                self.line(&text);
            }
            StmtKind::Break => self.line("break;"),
            StmtKind::Continue => self.line("continue;"),
            StmtKind::EntryPoint => self.line("entry;"),
        }
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    /// Render an expression of this method.
    pub fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Const(c) => constant(c),
            Expr::Load(place) => self.place(place),
            Expr::AddressOf(place) => format!("&{}", self.place(place)),
            Expr::Assign { target, value } => {
                format!("{} = {}", self.place(target), self.expr(value))
            }
            Expr::RefAssign { target, source } => {
                format!("{} = ref {}", self.place(target), self.place(source))
            }
            Expr::Call(call) => self.call(call),
            Expr::New(new) => {
                let mut text = format!(
                    "new {}({})",
                    self.module.types.name_of(new.ty),
                    self.args(&new.args)
                );
                if !new.initializers.is_empty() {
                    let inits: Vec<String> = new
                        .initializers
                        .iter()
                        .map(|init| format!("{} = {}", self.field_name(init.field), self.expr(&init.value)))
                        .collect();
                    let _ = write!(text, " {{ {} }}", inits.join(", "));
                }
                text
            }
            Expr::NewArray { element, len } => format!(
                "new {}[{}]",
                self.module.types.name_of(*element),
                self.expr(len)
            ),
            Expr::MethodPointer { method, receiver } => match receiver {
                Some(r) => format!("&{}.{}", self.expr(r), self.method_name(*method)),
                None => format!("&{}", self.method_name(*method)),
            },
            Expr::Unary { op, operand } => {
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                format!("{op}{}", self.expr(operand))
            }
            Expr::Binary { op, lhs, rhs } => {
                format!("({} {} {})", self.expr(lhs), binary_op(*op), self.expr(rhs))
            }
            Expr::Convert {
                conversion,
                operand,
            } => match conversion {
                Conversion::Numeric(kind) => format!("({kind}){}", self.expr(operand)),
                Conversion::Reinterpret(kind) => {
                    format!("reinterpret<{kind}>({})", self.expr(operand))
                }
                Conversion::Box(ty) => format!(
                    "box<{}>({})",
                    self.module.types.name_of(*ty),
                    self.expr(operand)
                ),
            },
            Expr::SizeOf(ty) => format!("sizeof({})", self.module.types.name_of(*ty)),
            Expr::Default(ty) => format!("default({})", self.module.types.name_of(*ty)),
            Expr::Sequence { effects, value } => {
                let parts: Vec<String> = effects.iter().map(|e| self.expr(e)).collect();
                match value {
                    Some(v) => format!("seq({} => {})", parts.join(", "), self.expr(v)),
                    None => format!("seq({})", parts.join(", ")),
                }
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => match otherwise {
                Some(o) => format!(
                    "({} ? {} : {})",
                    self.expr(cond),
                    self.expr(then),
                    self.expr(o)
                ),
                None => format!("when({}, {})", self.expr(cond), self.expr(then)),
            },
        }
    }

    fn call(&self, call: &Call) -> String {
        let receiver = call.receiver.as_ref().map(|r| match r {
            Arg::Value(e) => self.expr(e),
            Arg::Ref { place, .. } => self.place(place),
        });
        let args = self.args(&call.args);
        match &call.target {
            CallTarget::Method(id) => match receiver {
                Some(r) => format!("{r}.{}({args})", self.method_name(*id)),
                None => format!("{}({args})", self.method_name(*id)),
            },
            CallTarget::Tracker(member) => match receiver {
                Some(r) => format!("{r}.{}({args})", tracker_member(*member)),
                None => format!("Tracker::{}({args})", tracker_member(*member)),
            },
            CallTarget::Intrinsic(intrinsic) => match intrinsic {
                Intrinsic::ThrowIfCancellationRequested => "ThrowIfCancellationRequested()".into(),
                Intrinsic::EnsureSufficientExecutionStack => {
                    "EnsureSufficientExecutionStack()".into()
                }
                Intrinsic::CreateCoveragePayload { method } => {
                    format!("CreateCoveragePayload({})", self.method_name(*method))
                }
            },
            CallTarget::ToString { .. } => match receiver {
                Some(r) => format!("{r}.ToString()"),
                None => "ToString()".into(),
            },
            CallTarget::Indirect(callee) => format!("({})({args})", self.expr(callee)),
        }
    }

    fn args(&self, args: &[Arg]) -> String {
        args.iter()
            .map(|arg| match arg {
                Arg::Value(e) => self.expr(e),
                Arg::Ref { kind, place } => format!("{}{}", ref_prefix(*kind), self.place(place)),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render a place of this method.
    pub fn place(&self, place: &Place) -> String {
        match place {
            Place::Local(id) => match self.method.local(*id) {
                Some(local) => local.name.clone(),
                None => id.to_string(),
            },
            Place::Param(id) => match self.method.param(*id) {
                Some(param) => param.name.clone(),
                None => id.to_string(),
            },
            Place::This => "this".into(),
            Place::Field { receiver, field } => {
                format!("{}.{}", self.expr(receiver), self.field_name(*field))
            }
            Place::Element { array, index } => {
                format!("{}[{}]", self.expr(array), self.expr(index))
            }
            Place::Deref(pointer) => format!("*{}", self.expr(pointer)),
        }
    }

    fn field_name(&self, field: crate::ids::FieldId) -> String {
        match self.module.types.field(field) {
            Some(def) => def.name.clone(),
            None => field.to_string(),
        }
    }

    fn method_name(&self, id: MethodId) -> String {
        match self.module.method(id) {
            Some(m) => m.name.clone(),
            None => id.to_string(),
        }
    }
}

fn ref_prefix(kind: RefKind) -> &'static str {
    match kind {
        RefKind::None => "",
        RefKind::Ref => "ref ",
        RefKind::In => "in ",
        RefKind::Out => "out ",
    }
}

fn binary_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
    }
}

fn int_suffix(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Int8 => "i8",
        PrimitiveKind::Int16 => "i16",
        PrimitiveKind::Int64 => "i64",
        PrimitiveKind::Uint8 => "u8",
        PrimitiveKind::Uint16 => "u16",
        PrimitiveKind::Uint32 => "u32",
        PrimitiveKind::Uint64 => "u64",
        PrimitiveKind::NativeInt => "n",
        PrimitiveKind::NativeUint => "un",
        PrimitiveKind::Char => "c",
        _ => "",
    }
}

fn constant(c: &Constant) -> String {
    match c {
        Constant::Bool(b) => b.to_string(),
        Constant::Int { value, kind } => format!("{value}{}", int_suffix(*kind)),
        Constant::Float { value, kind } => match kind {
            PrimitiveKind::Float => format!("{}f32", value.0),
            _ => format!("{}", value.0),
        },
        Constant::Decimal { mantissa, scale } => format!("{mantissa}e-{scale}m"),
        Constant::Str(s) => format!("{s:?}"),
        Constant::Null => "null".into(),
    }
}

/// Name of a tracker member as printed in call position.
fn tracker_member(member: TrackerMember) -> String {
    match member {
        TrackerMember::LogStore { family, category } => {
            format!("{}<{category}>", family.member_prefix())
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MethodId, ParamId};
    use crate::ir::MethodBuilder;
    use crate::type_hash::primitives;
    use crate::types::TypeTable;

    #[test]
    fn prints_simple_method() {
        let mut b = MethodBuilder::new(MethodId::new(1), "F");
        let p = b.param("p", primitives::INT32);
        let a = b.local("a", primitives::INT32);
        let method = b.build(Stmt::block(vec![
            Stmt::expr(Expr::assign(Place::Local(a), Expr::int(1))),
            Stmt::expr(Expr::assign(
                Place::Param(p),
                Expr::assign(Place::Local(a), Expr::int(2)),
            )),
        ]));
        let module = Module::new(TypeTable::new());

        let text = IrPrinter::new(&module, &method).print_method();
        assert_eq!(
            text,
            "method F(p: int32) -> void\n  local a: int32\n{\n  a = 1;\n  p = a = 2;\n}\n"
        );
    }

    #[test]
    fn prints_tracker_calls() {
        let method = MethodBuilder::new(MethodId::new(1), "F").build(Stmt::nop());
        let module = Module::new(TypeTable::new());
        let printer = IrPrinter::new(&module, &method);

        let store = Expr::from_call(Call {
            target: CallTarget::Tracker(TrackerMember::LogStore {
                family: crate::tracker::StoreFamily::Parameter,
                category: crate::tracker::ValueCategory::U8,
            }),
            receiver: None,
            args: vec![Arg::Value(Expr::u32(0))],
            ret: primitives::VOID,
        });
        assert_eq!(printer.expr(&store), "Tracker::LogParameterStore<u8>(0u32)");
    }

    #[test]
    fn prints_ref_args_and_unknown_ids() {
        let method = MethodBuilder::new(MethodId::new(1), "F").build(Stmt::nop());
        let module = Module::new(TypeTable::new());
        let printer = IrPrinter::new(&module, &method);

        let call = Expr::call(
            MethodId::new(9),
            vec![Arg::out(Place::Param(ParamId::new(3)))],
            primitives::VOID,
        );
        assert_eq!(printer.expr(&call), "m9(out p3)");
    }

    #[test]
    fn prints_try_regions() {
        let mut b = MethodBuilder::new(MethodId::new(1), "F");
        let e = b.local("e", primitives::OBJECT);
        let method = b.build(Stmt::try_region(
            Stmt::block(vec![Stmt::throw(Expr::null())]),
            vec![crate::ir::CatchClause::new(Some(primitives::OBJECT), Some(e), Stmt::block(vec![]))
                .with_filter(Expr::bool(true))],
            Some(Stmt::block(vec![Stmt::ret(None)])),
        ));
        let module = Module::new(TypeTable::new());

        let text = IrPrinter::new(&module, &method).print_body();
        assert_eq!(
            text,
            "{\n  try {\n    throw null;\n  } catch (object e) when (true) {\n  } finally {\n    return;\n  }\n}\n"
        );
    }
}
