//! Interleaving tracker calls with a body.
//!
//! The rewriter walks a lowered body once and emits calls at each event:
//!
//! | source                          | rewritten                                         |
//! |---------------------------------|---------------------------------------------------|
//! | `x = v`                         | `seq(x = v, log(x) => x)`                         |
//! | `this.h = v` (hoisted)          | `seq(t = v, this.h = t, log(t) => t)`             |
//! | `c.h = v` (hoisted)             | `seq(o = c, t = v, o.h = t, log(t) => t)`         |
//! | `r = ref x`                     | `seq(r = ref x, alias(x, r))`                     |
//! | `f(ref x)`                      | `seq(t = f(ref x), log(x) => t)`                  |
//! | `f(ref c.h)` (hoisted)          | `seq(t = f(ref seq(o = c => o).h), log(o.h) => t)`|
//! | `catch (E e) when (c) { .. }`   | `catch (E e) when (seq(log(e) => c)) { .. }`      |
//! | `entry;`                        | `entry;` followed by parameter snapshots          |
//!
//! A receiver held in a local or parameter is read into `o` once, so a value
//! or argument that rebinds it cannot redirect the store or the read-back.
//! The value operand `=> x` is only kept where the original expression's
//! value is used. Missing tracker members are reported at the span of the
//! enclosing statement, falling back to the method's body span.

use statetrace_core::ir::{
    Arg, Call, CallTarget, CatchClause, Expr, MemberInit, MethodDecl, NewObject, Place, Stmt,
    StmtKind, SwitchCase, TryRegion,
};
use statetrace_core::{FieldId, LocalId, Span, TypeHash, primitives};

use crate::classify::StoreClassifier;
use crate::slot::TempAllocator;
use crate::synth::CallSynthesizer;

pub struct BodyRewriter<'a> {
    classifier: StoreClassifier<'a>,
    synth: CallSynthesizer<'a>,
    temps: &'a mut TempAllocator,
    fallback_span: Span,
    span: Option<Span>,
    snapshots: Vec<Place>,
    snapshots_emitted: bool,
}

impl<'a> BodyRewriter<'a> {
    pub fn new(
        method: &'a MethodDecl,
        classifier: StoreClassifier<'a>,
        synth: CallSynthesizer<'a>,
        temps: &'a mut TempAllocator,
    ) -> Self {
        Self {
            classifier,
            synth,
            temps,
            fallback_span: method.diagnostic_span(),
            span: None,
            snapshots: Vec::new(),
            snapshots_emitted: false,
        }
    }

    /// Places whose incoming values are logged at the entry point.
    pub fn with_snapshots(mut self, places: Vec<Place>) -> Self {
        self.snapshots = places;
        self
    }

    /// Rewrite `body`. Snapshots are only emitted at an entry point marker.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn rewrite(mut self, body: Stmt) -> Stmt {
        self.stmt(body)
    }

    fn snapshot_stmts(&mut self) -> Vec<Stmt> {
        let places = std::mem::take(&mut self.snapshots);
        places
            .into_iter()
            .filter_map(|place| {
                let target = self.classifier.store_target(&place)?;
                let span = self.current_span();
                self.synth.store(&target, place, span).map(Stmt::expr)
            })
            .collect()
    }

    /// Rewrite `body` and put the snapshots at its start when it has no
    /// entry point.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn rewrite_with_leading_snapshots(mut self, body: Stmt) -> Stmt {
        let body = self.stmt(body);
        if self.snapshots_emitted || self.snapshots.is_empty() {
            return body;
        }
        let mut stmts = self.snapshot_stmts();
        if stmts.is_empty() {
            return body;
        }
        stmts.extend(body.into_stmts());
        Stmt::block(stmts)
    }

    fn current_span(&self) -> Span {
        self.span.unwrap_or(self.fallback_span)
    }

    // ==========================================================================
    // Statements
    // ==========================================================================

    fn stmt(&mut self, stmt: Stmt) -> Stmt {
        let Stmt { kind, span } = stmt;
        let saved = self.span;
        if span.is_some() {
            self.span = span;
        }
        let kind = match kind {
            StmtKind::Nop | StmtKind::Break | StmtKind::Continue => kind,
            StmtKind::Expr(expr) => StmtKind::Expr(self.expr(expr, false)),
            StmtKind::Block(stmts) => {
                StmtKind::Block(stmts.into_iter().map(|s| self.stmt(s)).collect())
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => StmtKind::If {
                cond: self.expr(cond, true),
                then: Box::new(self.stmt(*then)),
                otherwise: otherwise.map(|o| Box::new(self.stmt(*o))),
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: self.expr(cond, true),
                body: Box::new(self.stmt(*body)),
            },
            StmtKind::Switch {
                scrutinee,
                cases,
                default,
            } => StmtKind::Switch {
                scrutinee: self.expr(scrutinee, true),
                cases: cases
                    .into_iter()
                    .map(|case| SwitchCase {
                        value: case.value,
                        body: self.stmt(case.body),
                    })
                    .collect(),
                default: default.map(|d| Box::new(self.stmt(*d))),
            },
            StmtKind::Try(region) => StmtKind::Try(Box::new(self.try_region(*region))),
            StmtKind::Throw(value) => StmtKind::Throw(value.map(|v| self.expr(v, true))),
            StmtKind::Return(value) => StmtKind::Return(value.map(|v| self.expr(v, true))),
            StmtKind::EntryPoint => {
                let snapshots = self.snapshot_stmts();
                self.snapshots_emitted = true;
                if snapshots.is_empty() {
                    StmtKind::EntryPoint
                } else {
                    let mut stmts = vec![Stmt::entry_point()];
                    stmts.extend(snapshots);
                    StmtKind::Block(stmts)
                }
            }
        };
        self.span = saved;
        Stmt { kind, span }
    }

    fn try_region(&mut self, region: TryRegion) -> TryRegion {
        let TryRegion {
            body,
            catches,
            finally,
        } = region;
        TryRegion {
            body: self.stmt(body),
            catches: catches.into_iter().map(|c| self.catch_clause(c)).collect(),
            finally: finally.map(|f| self.stmt(f)),
        }
    }

    fn catch_clause(&mut self, clause: CatchClause) -> CatchClause {
        let CatchClause {
            exception_type,
            local,
            filter,
            body,
        } = clause;
        let saved = self.span;
        if body.span.is_some() {
            self.span = body.span;
        }
        let log = local.and_then(|local| self.store_of(Place::Local(local)));
        self.span = saved;

        let filter = filter.map(|f| self.expr(f, true));
        let body = self.stmt(body);
        match (log, filter) {
            (Some(log), Some(filter)) => CatchClause {
                exception_type,
                local,
                filter: Some(Expr::sequence(vec![log], Some(filter))),
                body,
            },
            (Some(log), None) => {
                let mut stmts = vec![Stmt::expr(log)];
                stmts.extend(body.into_stmts());
                CatchClause {
                    exception_type,
                    local,
                    filter: None,
                    body: Stmt::block(stmts),
                }
            }
            (None, filter) => CatchClause {
                exception_type,
                local,
                filter,
                body,
            },
        }
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    /// Rewrite `expr`. `used` tells whether its value is consumed.
    fn expr(&mut self, expr: Expr, used: bool) -> Expr {
        match expr {
            Expr::Const(_) | Expr::SizeOf(_) | Expr::Default(_) => expr,
            Expr::Load(place) => Expr::Load(self.place(place)),
            Expr::AddressOf(place) => Expr::AddressOf(self.place(place)),
            Expr::Assign { target, value } => self.assign(target, *value, used),
            Expr::RefAssign { target, source } => self.ref_assign(target, source),
            Expr::Call(call) => self.call(*call, used),
            Expr::New(new) => self.new_object(*new, used),
            Expr::NewArray { element, len } => Expr::NewArray {
                element,
                len: Box::new(self.expr(*len, true)),
            },
            Expr::MethodPointer { method, receiver } => Expr::MethodPointer {
                method,
                receiver: receiver.map(|r| Box::new(self.expr(*r, true))),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(self.expr(*operand, true)),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op,
                lhs: Box::new(self.expr(*lhs, true)),
                rhs: Box::new(self.expr(*rhs, true)),
            },
            Expr::Convert {
                conversion,
                operand,
            } => Expr::Convert {
                conversion,
                operand: Box::new(self.expr(*operand, true)),
            },
            Expr::Sequence { effects, value } => Expr::Sequence {
                effects: effects.into_iter().map(|e| self.expr(e, false)).collect(),
                value: value.map(|v| Box::new(self.expr(*v, used))),
            },
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let cond = Box::new(self.expr(*cond, true));
                match otherwise {
                    Some(otherwise) => Expr::Conditional {
                        cond,
                        then: Box::new(self.expr(*then, used)),
                        otherwise: Some(Box::new(self.expr(*otherwise, used))),
                    },
                    None => Expr::Conditional {
                        cond,
                        then: Box::new(self.expr(*then, false)),
                        otherwise: None,
                    },
                }
            }
        }
    }

    fn place(&mut self, place: Place) -> Place {
        match place {
            Place::Local(_) | Place::Param(_) | Place::This => place,
            Place::Field { receiver, field } => Place::Field {
                receiver: Box::new(self.expr(*receiver, true)),
                field,
            },
            Place::Element { array, index } => Place::Element {
                array: Box::new(self.expr(*array, true)),
                index: Box::new(self.expr(*index, true)),
            },
            Place::Deref(pointer) => Place::Deref(Box::new(self.expr(*pointer, true))),
        }
    }

    fn arg(&mut self, arg: Arg) -> Arg {
        match arg {
            Arg::Value(expr) => Arg::Value(self.expr(expr, true)),
            Arg::Ref { kind, place } => Arg::Ref {
                kind,
                place: self.place(place),
            },
        }
    }

    /// A store call logging the current value of `place`, if it is tracked.
    fn store_of(&mut self, place: Place) -> Option<Expr> {
        let target = self.classifier.store_target(&place)?;
        let span = self.current_span();
        self.synth.store(&target, place, span)
    }

    fn assign(&mut self, target: Place, value: Expr, used: bool) -> Expr {
        let target = self.place(target);
        let value = self.expr(value, true);
        let Some(store) = self.classifier.store_target(&target) else {
            return Expr::assign(target, value);
        };
        let span = self.current_span();
        let Some(prepared) = self.synth.prepare_store(&store, span) else {
            return Expr::assign(target, value);
        };

        if store.entity.is_hoisted() {
            let mut effects = Vec::with_capacity(4);
            let target = match self.pin_receiver(&target) {
                Some((fill, receiver, field)) => {
                    effects.push(fill);
                    Place::field(Expr::local(receiver), field)
                }
                None => target,
            };
            let (fill, temp) = self.temps.spill(store.ty, value);
            let log = self.synth.emit_store(prepared, Place::Local(temp));
            effects.extend([fill, Expr::assign(target, Expr::local(temp)), log]);
            Expr::sequence(effects, used.then(|| Expr::local(temp)))
        } else {
            let log = self.synth.emit_store(prepared, target.clone());
            let result = used.then(|| Expr::Load(target.clone()));
            Expr::sequence(vec![Expr::assign(target, value), log], result)
        }
    }

    /// Read a rebindable field receiver of `place` into a temporary.
    ///
    /// Returns the fill, the temporary and the field.
    fn pin_receiver(&mut self, place: &Place) -> Option<(Expr, LocalId, FieldId)> {
        let Place::Field { receiver, field } = place else {
            return None;
        };
        let ty = self.classifier.rebindable_receiver(receiver)?;
        let (fill, temp) = self.temps.spill(ty, (**receiver).clone());
        Some((fill, temp, *field))
    }

    fn ref_assign(&mut self, target: Place, source: Place) -> Expr {
        let target = self.place(target);
        let source = self.place(source);
        let Some((member, from, to)) = self.classifier.alias(&target, &source) else {
            tracing::debug!("ref rebind between untracked places");
            return Expr::ref_assign(target, source);
        };
        let span = self.current_span();
        match self.synth.alias(member, from, to, span) {
            Some(log) => Expr::sequence(vec![Expr::ref_assign(target, source), log], None),
            None => Expr::ref_assign(target, source),
        }
    }

    fn call(&mut self, call: Call, used: bool) -> Expr {
        let Call {
            target,
            receiver,
            args,
            ret,
        } = call;
        let target = match target {
            CallTarget::Indirect(callee) => {
                CallTarget::Indirect(Box::new(self.expr(*callee, true)))
            }
            other => other,
        };
        let mut read_back = Vec::new();
        let receiver = receiver.map(|r| self.call_arg(r, &mut read_back));
        let args: Vec<Arg> = args
            .into_iter()
            .map(|a| self.call_arg(a, &mut read_back))
            .collect();
        let logs = self.read_back_logs(read_back);
        let call = Expr::from_call(Call {
            target,
            receiver,
            args,
            ret,
        });
        self.with_post_logs(call, ret, logs, used)
    }

    fn new_object(&mut self, new: NewObject, used: bool) -> Expr {
        let NewObject {
            ty,
            ctor,
            args,
            initializers,
        } = new;
        let mut read_back = Vec::new();
        let args: Vec<Arg> = args
            .into_iter()
            .map(|a| self.call_arg(a, &mut read_back))
            .collect();
        let initializers = initializers
            .into_iter()
            .map(|init| MemberInit {
                field: init.field,
                value: self.expr(init.value, true),
            })
            .collect();
        let logs = self.read_back_logs(read_back);
        let new = Expr::New(Box::new(NewObject {
            ty,
            ctor,
            args,
            initializers,
        }));
        self.with_post_logs(new, ty, logs, used)
    }

    /// Rewrite a call argument. A writable by-ref argument naming a tracked
    /// binding adds the place it is read back from after the call.
    fn call_arg(&mut self, arg: Arg, read_back: &mut Vec<Place>) -> Arg {
        let (kind, place) = match self.arg(arg) {
            Arg::Ref { kind, place } if kind.is_writable() => (kind, place),
            other => return other,
        };
        if self.classifier.store_target(&place).is_none() {
            return Arg::Ref { kind, place };
        }
        match self.pin_receiver(&place) {
            Some((fill, receiver, field)) => {
                read_back.push(Place::field(Expr::local(receiver), field));
                Arg::Ref {
                    kind,
                    place: Place::field(
                        Expr::sequence(vec![fill], Some(Expr::local(receiver))),
                        field,
                    ),
                }
            }
            None => {
                read_back.push(place.clone());
                Arg::Ref { kind, place }
            }
        }
    }

    /// Store calls logging each read-back place after the call commits.
    fn read_back_logs(&mut self, places: Vec<Place>) -> Vec<Expr> {
        places
            .into_iter()
            .filter_map(|place| self.store_of(place))
            .collect()
    }

    fn with_post_logs(&mut self, expr: Expr, ret: TypeHash, logs: Vec<Expr>, used: bool) -> Expr {
        if logs.is_empty() {
            return expr;
        }
        if used && ret != primitives::VOID {
            let (fill, temp) = self.temps.spill(ret, expr);
            let mut effects = vec![fill];
            effects.extend(logs);
            Expr::sequence(effects, Some(Expr::local(temp)))
        } else {
            let mut effects = vec![expr];
            effects.extend(logs);
            Expr::sequence(effects, None)
        }
    }
}
