//! Tree-walking evaluator over lowered bodies.
//!
//! Each call pushes a frame holding the method's parameters, locals and
//! receiver. Places resolve to [`Location`]s; ref locals, ref parameters and
//! by-ref receivers hold a [`Value::Ref`] and every access goes through to
//! the referent except [`Expr::RefAssign`], which rebinds the slot itself.
//!
//! Exceptions thrown by the program unwind as values and are
//! caught by `try` regions; [`RuntimeError`]s are faults and abort the run
//! without running `finally` blocks.

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use statetrace_core::ir::{
    Arg, BinaryOp, Call, CallTarget, CatchClause, Conversion, Expr, Intrinsic, Module, NewObject,
    Place, Stmt, StmtKind, TryRegion,
};
use statetrace_core::{
    FieldId, MethodId, POINTER_SIZE, PrimitiveKind, TrackerMember, TypeHash, TypeKind,
    ValueCategory, primitives,
};

use crate::error::{Result, RuntimeError};
use crate::heap::{HeapObject, ObjectData, ObjectHandle, ObjectHeap};
use crate::ops;
use crate::trace::{RecordingTracker, TraceEvent, TraceValue};
use crate::value::{Location, Slot, StructValue, Value};

/// Type thrown by `ThrowIfCancellationRequested` once cancellation is requested.
pub const OPERATION_CANCELED: &str = "System.OperationCanceledException";

/// Type thrown by `EnsureSufficientExecutionStack` past the probe depth.
pub const INSUFFICIENT_EXECUTION_STACK: &str = "System.InsufficientExecutionStackException";

const DEFAULT_MAX_DEPTH: usize = 512;
const DEFAULT_PROBE_DEPTH: usize = 256;

// ============================================================================
// Control flow
// ============================================================================

/// Abrupt completion of an expression or statement.
enum Unwind {
    /// A program exception.
    Throw(Value),
    Fault(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(err: RuntimeError) -> Self {
        Unwind::Fault(err)
    }
}

type Eval<T> = std::result::Result<T, Unwind>;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    params: Vec<Value>,
    locals: Vec<Value>,
    this: Option<Value>,
    /// Exceptions of the enclosing catch handlers, innermost last.
    handling: Vec<Value>,
}

fn nth(args: &[Value], position: usize) -> Result<&Value> {
    args.get(position)
        .ok_or(RuntimeError::MissingArgument(position))
}

fn entered(handle: Option<u64>) -> Result<u64> {
    handle.ok_or(RuntimeError::TrackerNotEntered)
}

fn format_decimal(mantissa: i128, scale: u8) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let scale = scale as usize;
    let digits = format!("{:0>width$}", mantissa.unsigned_abs(), width = scale + 1);
    let (whole, fraction) = digits.split_at(digits.len() - scale);
    let sign = if mantissa < 0 { "-" } else { "" };
    format!("{sign}{whole}.{fraction}")
}

// ============================================================================
// Vm
// ============================================================================

/// Evaluates methods of a module against a [`RecordingTracker`].
pub struct Vm<'m> {
    module: &'m Module,
    heap: ObjectHeap,
    frames: Vec<Frame>,
    tracker: RecordingTracker,
    coverage: Vec<MethodId>,
    cancelled: bool,
    probe_depth: usize,
    max_depth: usize,
}

impl<'m> Vm<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            heap: ObjectHeap::new(),
            frames: Vec::new(),
            tracker: RecordingTracker::new(),
            coverage: Vec::new(),
            cancelled: false,
            probe_depth: DEFAULT_PROBE_DEPTH,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Call depth past which the stack probe throws.
    pub fn with_probe_depth(mut self, depth: usize) -> Self {
        self.probe_depth = depth;
        self
    }

    /// Call depth that faults with [`RuntimeError::StackOverflow`].
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Signal cancellation; later cancellation checks throw.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn events(&self) -> &[TraceEvent] {
        self.tracker.events()
    }

    pub fn tracker_mut(&mut self) -> &mut RecordingTracker {
        &mut self.tracker
    }

    /// Methods whose coverage payload was created, in order.
    pub fn coverage(&self) -> &[MethodId] {
        &self.coverage
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    /// Call a method without a receiver.
    pub fn call(&mut self, method: MethodId, args: Vec<Value>) -> Result<Value> {
        tracing::debug!(%method, "call");
        let result = self.invoke(method, None, args).map(|(value, _)| value);
        self.settle(result)
    }

    /// Call an instance method on `receiver`.
    pub fn call_on(&mut self, method: MethodId, receiver: Value, args: Vec<Value>) -> Result<Value> {
        tracing::debug!(%method, "call on receiver");
        let result = self.invoke(method, Some(receiver), args).map(|(value, _)| value);
        self.settle(result)
    }

    /// Create an instance of `ty`, running `ctor` when given.
    pub fn construct(
        &mut self,
        ty: TypeHash,
        ctor: Option<MethodId>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let object = self.instantiate(ty)?;
        let Some(ctor) = ctor else {
            return Ok(object);
        };
        let result = self.invoke(ctor, Some(object), args);
        let (_, this) = self.settle(result)?;
        this.ok_or(RuntimeError::MissingReceiver)
    }

    /// Read a field of an object or struct value.
    pub fn field(&self, value: &Value, field: FieldId) -> Result<Value> {
        match value {
            Value::Object(object) => self.heap.field(*object, field).cloned(),
            Value::Struct(s) => {
                let position = self.field_position(s.ty, field)?;
                s.fields
                    .get(position)
                    .cloned()
                    .ok_or(RuntimeError::UnknownField(field))
            }
            Value::Null => Err(RuntimeError::NullReference),
            other => Err(RuntimeError::mismatch("object or struct", other)),
        }
    }

    fn settle<T>(&mut self, result: Eval<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(Unwind::Fault(err)) => {
                self.frames.clear();
                Err(err)
            }
            Err(Unwind::Throw(exception)) => {
                let ty = self.exception_name(&exception);
                tracing::debug!(%ty, "unhandled exception");
                self.frames.clear();
                Err(RuntimeError::UnhandledException { ty })
            }
        }
    }

    fn exception_name(&self, exception: &Value) -> String {
        let Value::Object(object) = exception else {
            return format!("{exception:?}");
        };
        let Ok(ty) = self.heap.type_of(*object) else {
            return "null".to_string();
        };
        [OPERATION_CANCELED, INSUFFICIENT_EXECUTION_STACK]
            .into_iter()
            .find(|name| TypeHash::from_name(name) == ty)
            .map(str::to_string)
            .unwrap_or_else(|| self.module.types.name_of(ty))
    }

    // ==========================================================================
    // Types
    // ==========================================================================

    fn default_value(&self, ty: TypeHash) -> Value {
        let Some(def) = self.module.types.get(ty) else {
            return Value::Void;
        };
        match &def.kind {
            TypeKind::Void => Value::Void,
            TypeKind::Primitive(kind) => ops::zero(*kind),
            TypeKind::Enum { underlying } => ops::zero(*underlying),
            TypeKind::Struct => Value::Struct(StructValue {
                ty,
                fields: def
                    .fields
                    .iter()
                    .map(|field| {
                        if field.is_ref {
                            Value::Void
                        } else {
                            self.default_value(field.ty)
                        }
                    })
                    .collect(),
            }),
            _ => Value::Null,
        }
    }

    fn field_position(&self, ty: TypeHash, field: FieldId) -> Result<usize> {
        self.module
            .types
            .get(ty)
            .ok_or(RuntimeError::UnknownType(ty))?
            .field_position(field)
            .ok_or(RuntimeError::UnknownField(field))
    }

    fn instantiate(&mut self, ty: TypeHash) -> Result<Value> {
        let module = self.module;
        let def = module.types.get(ty).ok_or(RuntimeError::UnknownType(ty))?;
        if def.is_value_type() {
            return Ok(self.default_value(ty));
        }
        let fields = def
            .fields
            .iter()
            .map(|field| (field.id, self.default_value(field.ty)))
            .collect();
        Ok(Value::Object(self.heap.allocate(HeapObject {
            ty,
            data: ObjectData::Fields(fields),
        })))
    }

    fn box_value(&mut self, value: Value, ty: TypeHash) -> Value {
        match value {
            Value::Object(_) | Value::Null | Value::Str(_) | Value::MethodPtr { .. } => value,
            value => Value::Object(self.heap.allocate(HeapObject {
                ty,
                data: ObjectData::Boxed(value),
            })),
        }
    }

    fn throw(&mut self, name: &str) -> Unwind {
        let object = self.heap.allocate(HeapObject {
            ty: TypeHash::from_name(name),
            data: ObjectData::Fields(FxHashMap::default()),
        });
        Unwind::Throw(Value::Object(object))
    }

    // ==========================================================================
    // Calls
    // ==========================================================================

    /// Run a method; returns its result and the receiver as it was left.
    fn invoke(
        &mut self,
        id: MethodId,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Eval<(Value, Option<Value>)> {
        let module = self.module;
        let method = module.method(id).ok_or(RuntimeError::UnknownMethod(id))?;
        let body = method.body.as_ref().ok_or(RuntimeError::NoBody(id))?;
        if args.len() != method.params.len() {
            return Err(RuntimeError::ArityMismatch {
                method: id,
                expected: method.params.len(),
                actual: args.len(),
            }
            .into());
        }
        if self.frames.len() >= self.max_depth {
            return Err(RuntimeError::StackOverflow {
                depth: self.frames.len(),
            }
            .into());
        }

        let locals = method
            .locals
            .iter()
            .map(|local| {
                if local.is_ref {
                    Value::Void
                } else {
                    self.default_value(local.ty)
                }
            })
            .collect();
        self.frames.push(Frame {
            params: args,
            locals,
            this,
            handling: Vec::new(),
        });
        let flow = self.exec(body);
        let this = self.frames.pop().and_then(|frame| frame.this);

        match flow? {
            Flow::Return(value) => Ok((value, this)),
            Flow::Normal => Ok((Value::Void, this)),
            Flow::Break => Err(RuntimeError::InvalidControlFlow("break").into()),
            Flow::Continue => Err(RuntimeError::InvalidControlFlow("continue").into()),
        }
    }

    fn eval_arg(&mut self, arg: &Arg) -> Eval<Value> {
        match arg {
            Arg::Value(expr) => self.eval(expr),
            Arg::Ref { place, .. } => Ok(Value::Ref(self.locate(place)?)),
        }
    }

    fn eval_args(&mut self, args: &[Arg]) -> Eval<Vec<Value>> {
        args.iter().map(|arg| self.eval_arg(arg)).collect()
    }

    fn eval_receiver(&mut self, call: &Call) -> Eval<Option<Value>> {
        match &call.receiver {
            Some(arg) => Ok(Some(self.eval_arg(arg)?)),
            None => Ok(None),
        }
    }

    fn eval_call(&mut self, call: &Call) -> Eval<Value> {
        match &call.target {
            CallTarget::Method(method) => {
                let receiver = self.eval_receiver(call)?;
                let args = self.eval_args(&call.args)?;
                Ok(self.invoke(*method, receiver, args)?.0)
            }
            CallTarget::Indirect(callee) => {
                let callee = self.eval(callee)?;
                let args = self.eval_args(&call.args)?;
                match callee {
                    Value::MethodPtr { method, receiver } => {
                        Ok(self.invoke(method, receiver.map(|r| *r), args)?.0)
                    }
                    Value::Null => Err(RuntimeError::NullReference.into()),
                    other => Err(RuntimeError::mismatch("method pointer", other).into()),
                }
            }
            CallTarget::Tracker(member) => self.tracker_call(*member, call),
            CallTarget::Intrinsic(intrinsic) => self.intrinsic(*intrinsic),
            CallTarget::ToString { constrained } => self.to_string_call(call, *constrained),
        }
    }

    fn intrinsic(&mut self, intrinsic: Intrinsic) -> Eval<Value> {
        match intrinsic {
            Intrinsic::ThrowIfCancellationRequested => {
                if self.cancelled {
                    return Err(self.throw(OPERATION_CANCELED));
                }
            }
            Intrinsic::EnsureSufficientExecutionStack => {
                if self.frames.len() > self.probe_depth {
                    return Err(self.throw(INSUFFICIENT_EXECUTION_STACK));
                }
            }
            Intrinsic::CreateCoveragePayload { method } => self.coverage.push(method),
        }
        Ok(Value::Void)
    }

    fn to_string_call(&mut self, call: &Call, constrained: Option<TypeHash>) -> Eval<Value> {
        let receiver = self
            .eval_receiver(call)?
            .ok_or(RuntimeError::MissingReceiver)?;
        let value = match &receiver {
            Value::Ref(location) => self.read(location)?,
            other => other.clone(),
        };
        if matches!(value, Value::Null) {
            return Ok(Value::Str(String::new()));
        }
        let ty = match (&value, constrained) {
            (_, Some(ty)) => Some(ty),
            (Value::Object(object), None) => Some(self.heap.type_of(*object)?),
            _ => None,
        };
        if let Some(method) = ty.and_then(|ty| self.to_string_override(ty)) {
            return Ok(self.invoke(method, Some(receiver), Vec::new())?.0);
        }
        Ok(Value::Str(self.display(&value)?))
    }

    fn to_string_override(&self, ty: TypeHash) -> Option<MethodId> {
        let types = &self.module.types;
        let def = types.get(ty)?;
        match def.kind {
            TypeKind::Nullable { inner } => types.get(inner)?.to_string,
            _ => def.to_string,
        }
    }

    /// Default `ToString` rendering.
    fn display(&mut self, value: &Value) -> Result<String> {
        Ok(match value {
            Value::Void | Value::Null => String::new(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int {
                value,
                kind: PrimitiveKind::Char,
            } => char::from_u32(*value as u32)
                .map(String::from)
                .unwrap_or_default(),
            Value::Int { value, .. } => value.to_string(),
            Value::Float {
                value,
                kind: PrimitiveKind::Float,
            } => (*value as f32).to_string(),
            Value::Float { value, .. } => value.to_string(),
            Value::Decimal { mantissa, scale } => format_decimal(*mantissa, *scale),
            Value::Str(s) => s.clone(),
            Value::Struct(s) => self.module.types.name_of(s.ty),
            Value::Object(object) => self.render_object(*object)?,
            Value::Ref(location) => {
                let target = self.read(location)?;
                self.display(&target)?
            }
            Value::Pointer(_) | Value::MethodPtr { .. } | Value::Tracker(_) => {
                format!("{value:?}")
            }
        })
    }

    fn render_object(&mut self, object: ObjectHandle) -> Result<String> {
        let heap_object = self.heap.get(object).ok_or(RuntimeError::NullReference)?;
        let ty = heap_object.ty;
        match &heap_object.data {
            ObjectData::Boxed(inner) => {
                let inner = inner.clone();
                self.display(&inner)
            }
            ObjectData::Fields(_) => Ok(self.module.types.name_of(ty)),
            ObjectData::Array(elements) => Ok(format!(
                "{}[{}]",
                self.module.types.name_of(ty),
                elements.len()
            )),
        }
    }

    // ==========================================================================
    // Tracker dispatch
    // ==========================================================================

    fn tracker_handle(&mut self, arg: &Arg) -> Eval<u64> {
        let value = match arg {
            Arg::Ref { place, .. } => {
                let location = self.locate(place)?;
                self.read(&location)?
            }
            Arg::Value(expr) => self.eval(expr)?,
        };
        match value {
            Value::Tracker(activation) => Ok(activation),
            _ => Err(RuntimeError::TrackerNotEntered.into()),
        }
    }

    fn tracker_call(&mut self, member: TrackerMember, call: &Call) -> Eval<Value> {
        let handle = match &call.receiver {
            Some(arg) => Some(self.tracker_handle(arg)?),
            None => None,
        };
        let args = self.eval_args(&call.args)?;

        let result = match member {
            TrackerMember::LogMethodEntry => {
                Value::Tracker(self.tracker.enter(nth(&args, 0)?.as_u32()?, None, None))
            }
            TrackerMember::LogLambdaEntry => Value::Tracker(self.tracker.enter(
                nth(&args, 0)?.as_u32()?,
                Some(nth(&args, 1)?.as_u32()?),
                None,
            )),
            TrackerMember::LogStateMachineMethodEntry => Value::Tracker(self.tracker.enter(
                nth(&args, 0)?.as_u32()?,
                None,
                Some(nth(&args, 1)?.as_u64()?),
            )),
            TrackerMember::LogStateMachineLambdaEntry => Value::Tracker(self.tracker.enter(
                nth(&args, 0)?.as_u32()?,
                Some(nth(&args, 1)?.as_u32()?),
                Some(nth(&args, 2)?.as_u64()?),
            )),
            TrackerMember::GetNewStateMachineInstanceId => Value::u64(self.tracker.new_instance_id()),
            TrackerMember::LogReturn => {
                self.tracker.returned(entered(handle)?);
                Value::Void
            }
            TrackerMember::LogStore { family, category } => {
                let activation = entered(handle)?;
                let value = self.trace_value(category, nth(&args, 0)?)?;
                let index = nth(&args, 1)?.as_u32()?;
                self.tracker.store(activation, family, index, value);
                Value::Void
            }
            TrackerMember::LogStoreUnmanaged { family } => {
                let activation = entered(handle)?;
                let bytes = match nth(&args, 0)? {
                    Value::Pointer(location) => {
                        let size = nth(&args, 1)?.as_u32()?;
                        let value = self.read(location)?;
                        self.encode(&value, size)?
                    }
                    Value::Null => return Err(RuntimeError::NullReference.into()),
                    other => return Err(RuntimeError::mismatch("pointer", other).into()),
                };
                let index = nth(&args, 2)?.as_u32()?;
                self.tracker
                    .store(activation, family, index, TraceValue::Unmanaged(bytes));
                Value::Void
            }
            TrackerMember::LogLocalStoreLocalAlias
            | TrackerMember::LogLocalStoreParameterAlias
            | TrackerMember::LogParameterStoreParameterAlias => {
                self.tracker.alias(
                    entered(handle)?,
                    member,
                    nth(&args, 0)?.as_u32()?,
                    nth(&args, 1)?.as_u32()?,
                );
                Value::Void
            }
        };
        Ok(result)
    }

    /// The value a store overload of `category` receives.
    ///
    /// Unsigned overloads only bind values of their own kind; signed values
    /// must be reinterpreted first.
    fn trace_value(&mut self, category: ValueCategory, value: &Value) -> Result<TraceValue> {
        Ok(match (category, value) {
            (ValueCategory::Bool, Value::Bool(b)) => TraceValue::Bool(*b),
            (
                ValueCategory::U8,
                Value::Int {
                    value,
                    kind: PrimitiveKind::Uint8,
                },
            ) => TraceValue::U8(*value as u8),
            (
                ValueCategory::U16,
                Value::Int {
                    value,
                    kind: PrimitiveKind::Uint16,
                },
            ) => TraceValue::U16(*value as u16),
            (
                ValueCategory::U32,
                Value::Int {
                    value,
                    kind: PrimitiveKind::Uint32,
                },
            ) => TraceValue::U32(*value as u32),
            (
                ValueCategory::U64,
                Value::Int {
                    value,
                    kind: PrimitiveKind::Uint64,
                },
            ) => TraceValue::U64(*value as u64),
            (ValueCategory::F32, Value::Float { value, .. }) => {
                TraceValue::F32(OrderedFloat(*value as f32))
            }
            (ValueCategory::F64, Value::Float { value, .. }) => {
                TraceValue::F64(OrderedFloat(*value))
            }
            (ValueCategory::Decimal, Value::Decimal { mantissa, scale }) => TraceValue::Decimal {
                mantissa: *mantissa,
                scale: *scale,
            },
            (ValueCategory::String, Value::Str(s)) => TraceValue::String(Some(s.clone())),
            (ValueCategory::String, Value::Null) => TraceValue::String(None),
            (ValueCategory::Object, Value::Null) => TraceValue::Object(None),
            (ValueCategory::Object, value) => TraceValue::Object(Some(self.display(value)?)),
            (ValueCategory::Pointer, Value::Null) => TraceValue::Pointer { is_null: true },
            (ValueCategory::Pointer, Value::Pointer(_) | Value::MethodPtr { .. }) => {
                TraceValue::Pointer { is_null: false }
            }
            (category, other) => return Err(RuntimeError::mismatch(category.name(), other)),
        })
    }

    /// Little-endian bytes of an unmanaged value, padded to `size`.
    ///
    /// Struct fields are laid out in declaration order at their natural
    /// alignment. A nullable holding a value is laid out as that value.
    fn encode(&self, value: &Value, size: u32) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(size as usize);
        self.encode_into(value, &mut bytes)?;
        bytes.resize(size as usize, 0);
        Ok(bytes)
    }

    fn encode_into(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Bool(b) => out.push(*b as u8),
            Value::Int { value, kind } => {
                out.extend_from_slice(&value.to_le_bytes()[..kind.size() as usize])
            }
            Value::Float {
                value,
                kind: PrimitiveKind::Float,
            } => out.extend_from_slice(&(*value as f32).to_le_bytes()),
            Value::Float { value, .. } => out.extend_from_slice(&value.to_le_bytes()),
            Value::Decimal { mantissa, .. } => out.extend_from_slice(&mantissa.to_le_bytes()),
            Value::Null | Value::Pointer(_) | Value::MethodPtr { .. } => {
                out.extend_from_slice(&[0; POINTER_SIZE as usize])
            }
            Value::Struct(s) => {
                let types = &self.module.types;
                let def = types.get(s.ty).ok_or(RuntimeError::UnknownType(s.ty))?;
                let start = out.len();
                for (field, value) in def.fields.iter().zip(&s.fields) {
                    let align = types.get(field.ty).map_or(1, |d| d.align.max(1)) as usize;
                    let offset = (out.len() - start).next_multiple_of(align);
                    out.resize(start + offset, 0);
                    self.encode_into(value, out)?;
                }
                let end = start + def.size as usize;
                if out.len() < end {
                    out.resize(end, 0);
                }
            }
            other => return Err(RuntimeError::mismatch("unmanaged value", other)),
        }
        Ok(())
    }

    // ==========================================================================
    // Places
    // ==========================================================================

    fn current(&self) -> Result<usize> {
        self.frames
            .len()
            .checked_sub(1)
            .ok_or(RuntimeError::NoActiveFrame)
    }

    fn slot_mut(&mut self, location: &Location) -> Result<&mut Value> {
        match location {
            Location::Slot { frame, slot } => {
                let frame = self
                    .frames
                    .get_mut(*frame)
                    .ok_or(RuntimeError::NoActiveFrame)?;
                match slot {
                    Slot::Local(id) => frame
                        .locals
                        .get_mut(id.index() as usize)
                        .ok_or(RuntimeError::UnknownSlot),
                    Slot::Param(id) => frame
                        .params
                        .get_mut(id.index() as usize)
                        .ok_or(RuntimeError::UnknownSlot),
                    Slot::This => frame.this.as_mut().ok_or(RuntimeError::MissingReceiver),
                }
            }
            Location::Field { object, field } => self.heap.field_mut(*object, *field),
            Location::StructField { base, position } => match self.slot_mut(base)? {
                Value::Struct(s) => {
                    let len = s.fields.len();
                    s.fields
                        .get_mut(*position)
                        .ok_or(RuntimeError::IndexOutOfRange {
                            index: *position as i128,
                            len,
                        })
                }
                other => Err(RuntimeError::mismatch("struct", other)),
            },
            Location::Element { array, index } => self.heap.element_mut(*array, *index),
        }
    }

    fn read(&mut self, location: &Location) -> Result<Value> {
        Ok(self.slot_mut(location)?.clone())
    }

    /// The referent of a ref slot, or the slot itself.
    fn follow(&mut self, direct: Location) -> Result<Location> {
        match self.slot_mut(&direct)? {
            Value::Ref(target) => Ok(target.clone()),
            _ => Ok(direct),
        }
    }

    fn locate(&mut self, place: &Place) -> Eval<Location> {
        let frame = self.current()?;
        let slot = match place {
            Place::Local(id) => Slot::Local(*id),
            Place::Param(id) => Slot::Param(*id),
            Place::This => Slot::This,
            Place::Field { receiver, field } => return self.locate_field(receiver, *field),
            Place::Element { array, index } => {
                let array = self.eval(array)?.as_object()?;
                let index = self.eval(index)?.as_int()?;
                let len = self.heap.array_len(array)?;
                if index < 0 || index >= len as i128 {
                    return Err(RuntimeError::IndexOutOfRange { index, len }.into());
                }
                return Ok(Location::Element {
                    array,
                    index: index as usize,
                });
            }
            Place::Deref(pointer) => {
                return match self.eval(pointer)? {
                    Value::Pointer(location) | Value::Ref(location) => Ok(location),
                    Value::Null => Err(RuntimeError::NullReference.into()),
                    other => Err(RuntimeError::mismatch("pointer", other).into()),
                };
            }
        };
        Ok(self.follow(Location::Slot { frame, slot })?)
    }

    fn locate_field(&mut self, receiver: &Expr, field: FieldId) -> Eval<Location> {
        let base = match receiver {
            Expr::Load(place) => self.locate(place)?,
            other => {
                let object = self.eval(other)?.as_object()?;
                return Ok(Location::Field { object, field });
            }
        };
        let ty = match self.slot_mut(&base)? {
            Value::Object(object) => {
                return Ok(Location::Field {
                    object: *object,
                    field,
                });
            }
            Value::Struct(s) => s.ty,
            Value::Null => return Err(RuntimeError::NullReference.into()),
            other => return Err(RuntimeError::mismatch("object or struct", other).into()),
        };
        let position = self.field_position(ty, field)?;
        Ok(Location::StructField {
            base: Box::new(base),
            position,
        })
    }

    fn load(&mut self, place: &Place) -> Eval<Value> {
        if let Place::Field { receiver, field } = place {
            if !matches!(**receiver, Expr::Load(_)) {
                let value = self.eval(receiver)?;
                return Ok(self.field(&value, *field)?);
            }
        }
        let location = self.locate(place)?;
        Ok(self.read(&location)?)
    }

    fn set_member(&mut self, target: &mut Value, field: FieldId, value: Value) -> Result<()> {
        match target {
            Value::Object(object) => *self.heap.field_mut(*object, field)? = value,
            Value::Struct(s) => {
                let position = self.field_position(s.ty, field)?;
                let slot = s
                    .fields
                    .get_mut(position)
                    .ok_or(RuntimeError::UnknownField(field))?;
                *slot = value;
            }
            other => return Err(RuntimeError::mismatch("object or struct", other)),
        }
        Ok(())
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Const(constant) => Ok(Value::from(constant)),
            Expr::Load(place) => self.load(place),
            Expr::AddressOf(place) => Ok(Value::Pointer(self.locate(place)?)),
            Expr::Assign { target, value } => {
                let location = self.locate(target)?;
                let value = self.eval(value)?;
                *self.slot_mut(&location)? = value.clone();
                Ok(value)
            }
            Expr::RefAssign { target, source } => {
                let source = self.locate(source)?;
                let slot = match target {
                    Place::Local(id) => Slot::Local(*id),
                    Place::Param(id) => Slot::Param(*id),
                    _ => return Err(RuntimeError::NotAssignable("ref rebind target").into()),
                };
                let frame = self.current()?;
                *self.slot_mut(&Location::Slot { frame, slot })? = Value::Ref(source);
                Ok(Value::Void)
            }
            Expr::Call(call) => self.eval_call(call),
            Expr::New(new) => self.eval_new(new),
            Expr::NewArray { element, len } => {
                let len = self.eval(len)?.as_int()?;
                if len < 0 {
                    return Err(RuntimeError::IndexOutOfRange { index: len, len: 0 }.into());
                }
                let elements = vec![self.default_value(*element); len as usize];
                Ok(Value::Object(self.heap.allocate(HeapObject {
                    ty: *element,
                    data: ObjectData::Array(elements),
                })))
            }
            Expr::MethodPointer { method, receiver } => {
                let receiver = match receiver {
                    Some(receiver) => Some(Box::new(self.eval(receiver)?)),
                    None => None,
                };
                Ok(Value::MethodPtr {
                    method: *method,
                    receiver,
                })
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                Ok(ops::unary(*op, operand)?)
            }
            Expr::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                if !self.eval(lhs)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs)?.as_bool()?))
            }
            Expr::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                if self.eval(lhs)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs)?.as_bool()?))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(ops::binary(*op, lhs, rhs)?)
            }
            Expr::Convert {
                conversion,
                operand,
            } => {
                let operand = self.eval(operand)?;
                Ok(match conversion {
                    Conversion::Numeric(kind) => ops::numeric(operand, *kind)?,
                    Conversion::Reinterpret(kind) => ops::reinterpret(operand, *kind)?,
                    Conversion::Box(ty) => self.box_value(operand, *ty),
                })
            }
            Expr::SizeOf(ty) => {
                let size = self
                    .module
                    .types
                    .size_of(*ty)
                    .ok_or(RuntimeError::UnknownType(*ty))?;
                Ok(Value::u32(size))
            }
            Expr::Default(ty) => Ok(self.default_value(*ty)),
            Expr::Sequence { effects, value } => {
                for effect in effects {
                    self.eval(effect)?;
                }
                match value {
                    Some(value) => self.eval(value),
                    None => Ok(Value::Void),
                }
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.as_bool()? {
                    self.eval(then)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise)
                } else {
                    Ok(Value::Void)
                }
            }
        }
    }

    fn eval_new(&mut self, new: &NewObject) -> Eval<Value> {
        let args = self.eval_args(&new.args)?;
        let mut object = self.instantiate(new.ty)?;
        if let Some(ctor) = new.ctor {
            let (_, this) = self.invoke(ctor, Some(object), args)?;
            object = this.ok_or(RuntimeError::MissingReceiver)?;
        }
        for init in &new.initializers {
            let value = self.eval(&init.value)?;
            self.set_member(&mut object, init.field, value)?;
        }
        Ok(object)
    }

    // ==========================================================================
    // Statements
    // ==========================================================================

    fn exec(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match &stmt.kind {
            StmtKind::Nop | StmtKind::EntryPoint => Ok(Flow::Normal),
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Block(stmts) => {
                for stmt in stmts {
                    match self.exec(stmt)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.as_bool()? {
                    self.exec(then)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond)?.as_bool()? {
                    match self.exec(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Switch {
                scrutinee,
                cases,
                default,
            } => {
                let value = self.eval(scrutinee)?.as_int()?;
                let body = cases
                    .iter()
                    .find(|case| case.value == value)
                    .map(|case| &case.body)
                    .or(default.as_deref());
                match body {
                    Some(body) => match self.exec(body)? {
                        Flow::Break => Ok(Flow::Normal),
                        flow => Ok(flow),
                    },
                    None => Ok(Flow::Normal),
                }
            }
            StmtKind::Try(region) => self.exec_try(region),
            StmtKind::Throw(Some(expr)) => {
                let exception = self.eval(expr)?;
                if matches!(exception, Value::Null) {
                    return Err(RuntimeError::NullReference.into());
                }
                Err(Unwind::Throw(exception))
            }
            StmtKind::Throw(None) => {
                let current = self
                    .frames
                    .last()
                    .and_then(|frame| frame.handling.last())
                    .cloned();
                match current {
                    Some(exception) => Err(Unwind::Throw(exception)),
                    None => Err(RuntimeError::InvalidControlFlow("rethrow").into()),
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Void,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
        }
    }

    fn exec_try(&mut self, region: &TryRegion) -> Eval<Flow> {
        let mut outcome = self.exec(&region.body);
        if let Err(Unwind::Throw(exception)) = &outcome {
            let exception = exception.clone();
            if let Some(handled) = self.handle(&region.catches, exception) {
                outcome = handled;
            }
        }
        if let Err(Unwind::Fault(_)) = outcome {
            return outcome;
        }
        if let Some(finally) = &region.finally {
            match self.exec(finally)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    /// Run the first handler that accepts `exception`, if any.
    fn handle(&mut self, catches: &[CatchClause], exception: Value) -> Option<Eval<Flow>> {
        for clause in catches {
            match self.accepts(clause, &exception) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(fault) => return Some(Err(fault)),
            }
            if let Some(frame) = self.frames.last_mut() {
                frame.handling.push(exception);
            }
            let result = self.exec(&clause.body);
            if let Some(frame) = self.frames.last_mut() {
                frame.handling.pop();
            }
            return Some(result);
        }
        None
    }

    fn accepts(&mut self, clause: &CatchClause, exception: &Value) -> Eval<bool> {
        if let Some(ty) = clause.exception_type {
            let actual = self.heap.type_of(exception.as_object()?)?;
            if ty != primitives::OBJECT && ty != actual {
                return Ok(false);
            }
        }
        if let Some(local) = clause.local {
            let frame = self.current()?;
            *self.slot_mut(&Location::Slot {
                frame,
                slot: Slot::Local(local),
            })? = exception.clone();
        }
        match &clause.filter {
            None => Ok(true),
            Some(filter) => match self.eval(filter) {
                Ok(value) => Ok(value.as_bool()?),
                Err(Unwind::Throw(_)) => Ok(false),
                Err(fault) => Err(fault),
            },
        }
    }
}
