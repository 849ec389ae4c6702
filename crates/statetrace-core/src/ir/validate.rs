//! Reference checks run before a body is rewritten.

use crate::error::{IrError, Result};
use crate::types::TypeTable;

use super::{Arg, CallTarget, Expr, MethodDecl, Place, Stmt, StmtKind};

/// Check that every local, parameter, field and declared type a method
/// references exists.
pub fn validate_method(method: &MethodDecl, types: &TypeTable) -> Result<()> {
    let declared = method
        .params
        .iter()
        .map(|p| p.ty)
        .chain(method.locals.iter().map(|l| l.ty))
        .chain(std::iter::once(method.return_type));
    for ty in declared {
        if !types.contains(ty) {
            return Err(IrError::UnknownType {
                method: method.id,
                ty,
            });
        }
    }

    let mut checker = Checker { method, types };
    match &method.body {
        Some(body) => checker.stmt(body),
        None => Ok(()),
    }
}

struct Checker<'a> {
    method: &'a MethodDecl,
    types: &'a TypeTable,
}

impl Checker<'_> {
    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Nop
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::EntryPoint
            | StmtKind::Throw(None)
            | StmtKind::Return(None) => Ok(()),
            StmtKind::Expr(e) | StmtKind::Throw(Some(e)) | StmtKind::Return(Some(e)) => {
                self.expr(e)
            }
            StmtKind::Block(stmts) => stmts.iter().try_for_each(|s| self.stmt(s)),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond)?;
                self.stmt(then)?;
                otherwise.as_deref().map_or(Ok(()), |s| self.stmt(s))
            }
            StmtKind::While { cond, body } => {
                self.expr(cond)?;
                self.stmt(body)
            }
            StmtKind::Switch {
                scrutinee,
                cases,
                default,
            } => {
                self.expr(scrutinee)?;
                for case in cases {
                    self.stmt(&case.body)?;
                }
                default.as_deref().map_or(Ok(()), |s| self.stmt(s))
            }
            StmtKind::Try(region) => {
                self.stmt(&region.body)?;
                for catch in &region.catches {
                    if let Some(local) = catch.local {
                        self.place(&Place::Local(local))?;
                    }
                    if let Some(filter) = &catch.filter {
                        self.expr(filter)?;
                    }
                    self.stmt(&catch.body)?;
                }
                region.finally.as_ref().map_or(Ok(()), |s| self.stmt(s))
            }
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Const(_) | Expr::SizeOf(_) | Expr::Default(_) => Ok(()),
            Expr::Load(place) | Expr::AddressOf(place) => self.place(place),
            Expr::Assign { target, value } => {
                self.place(target)?;
                self.expr(value)
            }
            Expr::RefAssign { target, source } => {
                let is_ref_target = match target {
                    Place::Local(id) => self.method.local(*id).is_some_and(|l| l.is_ref),
                    Place::Param(id) => self
                        .method
                        .param(*id)
                        .is_some_and(|p| p.ref_kind != super::RefKind::None),
                    Place::Field { field, .. } => {
                        self.types.field(*field).is_some_and(|f| f.is_ref)
                    }
                    _ => false,
                };
                self.place(target)?;
                if !is_ref_target {
                    return Err(IrError::InvalidRefTarget {
                        method: self.method.id,
                    });
                }
                self.place(source)
            }
            Expr::Call(call) => {
                if let CallTarget::Indirect(callee) = &call.target {
                    self.expr(callee)?;
                }
                if let Some(receiver) = &call.receiver {
                    self.arg(receiver)?;
                }
                call.args.iter().try_for_each(|a| self.arg(a))
            }
            Expr::New(new) => {
                new.args.iter().try_for_each(|a| self.arg(a))?;
                for init in &new.initializers {
                    self.field(init.field)?;
                    self.expr(&init.value)?;
                }
                Ok(())
            }
            Expr::NewArray { len, .. } => self.expr(len),
            Expr::MethodPointer { receiver, .. } => {
                receiver.as_deref().map_or(Ok(()), |r| self.expr(r))
            }
            Expr::Unary { operand, .. } | Expr::Convert { operand, .. } => self.expr(operand),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs)?;
                self.expr(rhs)
            }
            Expr::Sequence { effects, value } => {
                effects.iter().try_for_each(|e| self.expr(e))?;
                value.as_deref().map_or(Ok(()), |v| self.expr(v))
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond)?;
                self.expr(then)?;
                otherwise.as_deref().map_or(Ok(()), |o| self.expr(o))
            }
        }
    }

    fn arg(&mut self, arg: &Arg) -> Result<()> {
        match arg {
            Arg::Value(e) => self.expr(e),
            Arg::Ref { place, .. } => self.place(place),
        }
    }

    fn place(&mut self, place: &Place) -> Result<()> {
        match place {
            Place::Local(id) => match self.method.local(*id) {
                Some(_) => Ok(()),
                None => Err(IrError::UnknownLocal {
                    method: self.method.id,
                    local: *id,
                }),
            },
            Place::Param(id) => match self.method.param(*id) {
                Some(_) => Ok(()),
                None => Err(IrError::UnknownParam {
                    method: self.method.id,
                    param: *id,
                }),
            },
            Place::This => Ok(()),
            Place::Field { receiver, field } => {
                self.field(*field)?;
                self.expr(receiver)
            }
            Place::Element { array, index } => {
                self.expr(array)?;
                self.expr(index)
            }
            Place::Deref(pointer) => self.expr(pointer),
        }
    }

    fn field(&self, field: crate::ids::FieldId) -> Result<()> {
        match self.types.field(field) {
            Some(_) => Ok(()),
            None => Err(IrError::UnknownField {
                method: self.method.id,
                field,
            }),
        }
    }
}
