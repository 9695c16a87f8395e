//! Tree-walking evaluation of parsed nodes against a persistent namespace.

use std::{rc::Rc, str::FromStr};

use pyvm::OutputChannel;

use crate::{
    builtins::{Builtin, call, get_attr, set_attr},
    config::{ResourceLimits, Tracker},
    exception_private::{ExcType, ExceptionRaise, RunError, RunResult, SimpleException},
    expressions::{Conversion, Expr, FStringPart, Handler, ImportAlias, Literal, Node, NodeKind, Operator, Target},
    ops::{binary_op, compare, inplace_op, unary_op},
    value::{Module, Namespace, Range, Value, ValueIter, collect, normalize_index},
};

/// How a block finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Break,
    Continue,
}

/// A subscript: `obj[i]` or `obj[lo:hi:step]`.
#[derive(Debug)]
enum Index {
    Item(Value),
    Slice {
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    },
}

/// Runs one `exec` worth of nodes.
pub(crate) struct Executor<'a> {
    globals: &'a mut Namespace,
    sys: &'a Rc<Module>,
    output: &'a OutputChannel,
    tracker: Tracker,
    /// Exceptions whose `except` block is running, innermost last.
    handling: Vec<Rc<SimpleException>>,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(
        globals: &'a mut Namespace,
        sys: &'a Rc<Module>,
        output: &'a OutputChannel,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            globals,
            sys,
            output,
            tracker: Tracker::new(limits),
            handling: Vec::new(),
        }
    }

    pub(crate) fn run(&mut self, nodes: &[Node]) -> RunResult<()> {
        self.exec_block(nodes).map(|_| ())
    }

    fn exec_block(&mut self, nodes: &[Node]) -> RunResult<Flow> {
        self.tracker.enter()?;
        let result = self.exec_nodes(nodes);
        self.tracker.leave();
        result
    }

    fn exec_nodes(&mut self, nodes: &[Node]) -> RunResult<Flow> {
        for node in nodes {
            match self.exec_node(node).map_err(|err| err.at_line(node.line))? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_node(&mut self, node: &Node) -> RunResult<Flow> {
        self.tracker.on_operation()?;
        match &node.kind {
            NodeKind::Expr(expr) => {
                self.eval(expr)?;
            }
            NodeKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            NodeKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            NodeKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            NodeKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.is_truthy() { body } else { orelse };
                return self.exec_block(branch);
            }
            NodeKind::While { test, body, orelse } => {
                while self.eval(test)?.is_truthy() {
                    self.tracker.on_operation()?;
                    if self.exec_block(body)? == Flow::Break {
                        return Ok(Flow::Next);
                    }
                }
                return self.exec_block(orelse);
            }
            NodeKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                for item in ValueIter::new(&iterable)? {
                    self.tracker.on_operation()?;
                    self.assign(target, item)?;
                    if self.exec_block(body)? == Flow::Break {
                        return Ok(Flow::Next);
                    }
                }
                return self.exec_block(orelse);
            }
            NodeKind::Break => return Ok(Flow::Break),
            NodeKind::Continue => return Ok(Flow::Continue),
            NodeKind::Pass => {}
            NodeKind::Assert { test, msg } => {
                if !self.eval(test)?.is_truthy() {
                    let args = match msg {
                        Some(msg) => vec![self.eval(msg)?],
                        None => Vec::new(),
                    };
                    return Err(SimpleException::new(ExcType::AssertionError, args).into());
                }
            }
            NodeKind::Raise { exc, cause } => return Err(self.raise(exc.as_ref(), cause.as_ref())?),
            NodeKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => return self.exec_try(body, handlers, orelse, finally),
            NodeKind::Import(aliases) => {
                for alias in aliases {
                    self.import(alias)?;
                }
            }
            NodeKind::ImportFrom { module, names } => self.import_from(module, names)?,
        }
        Ok(Flow::Next)
    }

    /// Builds the error a `raise` statement propagates.
    fn raise(&mut self, exc: Option<&Expr>, cause: Option<&Expr>) -> RunResult<RunError> {
        let Some(exc) = exc else {
            return match self.handling.last() {
                Some(active) => Ok(RunError::raise(Rc::clone(active))),
                None => Err(ExcType::RuntimeError.msg("No active exception to reraise")),
            };
        };
        let exc = self.eval(exc)?;
        let exc = match exc {
            Value::ExcClass(exc_type) => Rc::new(SimpleException::new(exc_type, Vec::new())),
            Value::Exception(exc) => exc,
            _ => return Err(ExcType::TypeError.msg("exceptions must derive from BaseException")),
        };
        if let Some(cause) = cause {
            let cause = self.eval(cause)?;
            if !matches!(cause, Value::None | Value::ExcClass(_) | Value::Exception(_)) {
                return Err(ExcType::TypeError.msg("exception causes must derive from BaseException"));
            }
        }
        Ok(RunError::raise(exc))
    }

    fn exec_try(&mut self, body: &[Node], handlers: &[Handler], orelse: &[Node], finally: &[Node]) -> RunResult<Flow> {
        let outcome = match self.exec_block(body) {
            Err(RunError::Exc(raise)) => self.handle(raise, handlers),
            Ok(Flow::Next) => self.exec_block(orelse),
            other => other,
        };
        if finally.is_empty() || matches!(outcome, Err(RunError::UncatchableExc(_))) {
            return outcome;
        }
        match self.exec_block(finally)? {
            Flow::Next => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, raise: Box<ExceptionRaise>, handlers: &[Handler]) -> RunResult<Flow> {
        for handler in handlers {
            if let Some(class) = &handler.exc_type {
                let class = self.eval(class)?;
                if !exception_matches(&raise.exc, &class)? {
                    continue;
                }
            }
            if let Some(name) = &handler.name {
                self.globals
                    .insert(name.clone(), Value::Exception(Rc::clone(&raise.exc)));
            }
            self.handling.push(Rc::clone(&raise.exc));
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.globals.shift_remove(name);
            }
            return result;
        }
        Err(RunError::Exc(raise))
    }

    fn import(&mut self, alias: &ImportAlias) -> RunResult<()> {
        match alias.name.split_once('.') {
            None if alias.name == self.sys.name => {
                self.globals
                    .insert(alias.binding().to_owned(), Value::Module(Rc::clone(self.sys)));
                Ok(())
            }
            Some((package, _)) if package == self.sys.name => Err(ExcType::ModuleNotFoundError.msg(format!(
                "No module named '{}'; '{package}' is not a package",
                alias.name
            ))),
            _ => Err(ExcType::ModuleNotFoundError.msg(format!("No module named '{}'", alias.name))),
        }
    }

    fn import_from(&mut self, module: &str, names: &[ImportAlias]) -> RunResult<()> {
        if module != self.sys.name {
            return Err(ExcType::ModuleNotFoundError.msg(format!("No module named '{module}'")));
        }
        let attrs = self.sys.attrs.borrow();
        for alias in names {
            if alias.name == "*" {
                for (name, value) in attrs.iter() {
                    self.globals.insert(name.clone(), value.clone());
                }
                continue;
            }
            let value = attrs.get(&alias.name).cloned().ok_or_else(|| {
                ExcType::ImportError.msg(format!(
                    "cannot import name '{}' from '{module}' (unknown location)",
                    alias.name
                ))
            })?;
            self.globals.insert(alias.binding().to_owned(), value);
        }
        Ok(())
    }

    fn assign(&mut self, target: &Target, value: Value) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                self.globals.insert(name.clone(), value);
                Ok(())
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                set_item(&object, index, value)
            }
            Target::Attr { object, attr } => {
                let object = self.eval(object)?;
                set_attr(&object, attr, value)
            }
            Target::Unpack(targets) => {
                let items = match &value {
                    Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Bytes(_) | Value::Dict(_) | Value::Range(_) => {
                        collect(&value)?
                    }
                    other => {
                        return Err(ExcType::TypeError.msg(format!(
                            "cannot unpack non-iterable {} object",
                            other.type_name()
                        )));
                    }
                };
                if items.len() < targets.len() {
                    return Err(ExcType::ValueError.msg(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(ExcType::ValueError.msg(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: Operator, value: &Expr) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = inplace_op(op, &current, &rhs)?;
                self.globals.insert(name.clone(), updated);
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                let key = match &index {
                    Index::Item(key) => key.clone(),
                    Index::Slice { .. } => {
                        return Err(ExcType::NotImplementedError.msg("augmented assignment to a slice"));
                    }
                };
                let current = get_item(&object, index)?;
                let rhs = self.eval(value)?;
                let updated = inplace_op(op, &current, &rhs)?;
                set_item(&object, Index::Item(key), updated)?;
            }
            Target::Attr { object, attr } => {
                let object = self.eval(object)?;
                let current = get_attr(&object, attr)?;
                let rhs = self.eval(value)?;
                let updated = inplace_op(op, &current, &rhs)?;
                set_attr(&object, attr, updated)?;
            }
            Target::Unpack(_) => {
                return Err(ExcType::SyntaxError.msg("illegal expression for augmented assignment"));
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Target) -> RunResult<()> {
        match target {
            Target::Name(name) => match self.globals.shift_remove(name) {
                Some(_) => Ok(()),
                None => Err(ExcType::name_error(name)),
            },
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                del_item(&object, index)
            }
            Target::Attr { object, attr } => {
                let object = self.eval(object)?;
                let removed = match &object {
                    Value::Module(module) => module.attrs.borrow_mut().shift_remove(attr.as_str()),
                    _ => None,
                };
                removed.map(|_| ()).ok_or_else(|| ExcType::attribute_error(&object, attr))
            }
            Target::Unpack(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
        }
    }

    fn lookup(&self, name: &str) -> RunResult<Value> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Ok(builtin) = Builtin::from_str(name) {
            return Ok(Value::Builtin(builtin));
        }
        if let Ok(exc_type) = ExcType::from_str(name) {
            return Ok(Value::ExcClass(exc_type));
        }
        Err(ExcType::name_error(name))
    }

    fn eval(&mut self, expr: &Expr) -> RunResult<Value> {
        self.tracker.enter()?;
        let result = self.eval_inner(expr);
        self.tracker.leave();
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> RunResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::BigInt(b) => Value::from_bigint(b.clone()),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(Rc::clone(s)),
                Literal::Bytes(b) => Value::Bytes(Rc::clone(b)),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::List(elts) => Ok(Value::from(self.eval_elements(elts)?)),
            Expr::Tuple(elts) => Ok(Value::Tuple(self.eval_elements(elts)?.into())),
            Expr::Dict(pairs) => {
                let mut dict = crate::value::Dict::default();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::new_dict(dict))
            }
            Expr::Starred(_) => Err(ExcType::SyntaxError.msg("can't use starred expression here")),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Interpolation {
                            expr,
                            conversion,
                            debug_prefix,
                        } => {
                            let value = self.eval(expr)?;
                            if let Some(prefix) = debug_prefix {
                                out.push_str(prefix);
                            }
                            match conversion {
                                Conversion::Repr => out.push_str(&value.py_repr()),
                                Conversion::None | Conversion::Str => out.push_str(&value.py_str()),
                            }
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::BinOp { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right)
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.eval(operand)?;
                unary_op(*op, &operand)
            }
            Expr::And(values) => self.eval_bool_chain(values, false),
            Expr::Or(values) => self.eval_bool_chain(values, true),
            Expr::Compare { left, links } => {
                let mut lhs = self.eval(left)?;
                for (op, right) in links {
                    let rhs = self.eval(right)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let args = self.eval_elements(args)?;
                let mut evaluated = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    if evaluated.iter().any(|(seen, _): &(String, Value)| seen == name) {
                        return Err(ExcType::SyntaxError.msg(format!("keyword argument repeated: {name}")));
                    }
                    evaluated.push((name.clone(), self.eval(value)?));
                }
                call(&func, args, evaluated, self.output)
            }
            Expr::Attr { object, attr } => {
                let object = self.eval(object)?;
                get_attr(&object, attr)
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                get_item(&object, index)
            }
            Expr::Slice { .. } => Err(ExcType::NotImplementedError.msg("slice objects outside subscripts")),
        }
    }

    /// `a and b and c` returns the first falsy operand (`stop_on` false) and
    /// `a or b or c` the first truthy one; otherwise the last operand.
    fn eval_bool_chain(&mut self, values: &[Expr], stop_on: bool) -> RunResult<Value> {
        let mut last = Value::None;
        for value in values {
            last = self.eval(value)?;
            if last.is_truthy() == stop_on {
                return Ok(last);
            }
        }
        Ok(last)
    }

    /// Evaluates a display or argument list, expanding `*iterable`.
    fn eval_elements(&mut self, elts: &[Expr]) -> RunResult<Vec<Value>> {
        let mut out = Vec::with_capacity(elts.len());
        for elt in elts {
            match elt {
                Expr::Starred(inner) => {
                    let iterable = self.eval(inner)?;
                    out.extend(ValueIter::new(&iterable)?);
                }
                other => out.push(self.eval(other)?),
            }
        }
        Ok(out)
    }

    fn eval_index(&mut self, index: &Expr) -> RunResult<Index> {
        let Expr::Slice { lower, upper, step } = index else {
            return self.eval(index).map(Index::Item);
        };
        let mut bound = |expr: &Option<Box<Expr>>| -> RunResult<Option<i64>> {
            let Some(expr) = expr else { return Ok(None) };
            match self.eval(expr)? {
                Value::None => Ok(None),
                value => value.as_index().map(Some).ok_or_else(|| {
                    ExcType::TypeError.msg("slice indices must be integers or None or have an __index__ method")
                }),
            }
        };
        Ok(Index::Slice {
            lower: bound(lower)?,
            upper: bound(upper)?,
            step: bound(step)?,
        })
    }
}

fn exception_matches(exc: &SimpleException, class: &Value) -> RunResult<bool> {
    match class {
        Value::ExcClass(exc_type) => Ok(exc.exc_type.is_subclass_of(*exc_type)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exc, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExcType::TypeError.msg("catching classes that do not inherit from BaseException is not allowed")),
    }
}

/// Positions selected by `[lower:upper:step]` on a sequence of length `len`.
fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> RunResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExcType::ValueError.msg("slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let (lo, hi) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(b) if b < 0 => (b + len).max(lo),
        Some(b) => b.min(hi),
    };
    let start = clamp(lower, if step > 0 { lo } else { hi });
    let stop = clamp(upper, if step > 0 { hi } else { lo });
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.extend(usize::try_from(i).ok());
        let Some(next) = i.checked_add(step) else {
            break;
        };
        i = next;
    }
    Ok(out)
}

fn seq_index_error(value: &Value) -> RunError {
    let msg = match value {
        Value::List(_) => "list index out of range",
        Value::Tuple(_) => "tuple index out of range",
        Value::Str(_) => "string index out of range",
        Value::Range(_) => "range object index out of range",
        _ => "index out of range",
    };
    ExcType::IndexError.msg(msg)
}

fn seq_index_type_error(value: &Value, index: &Value) -> RunError {
    match value {
        Value::Str(_) => ExcType::TypeError.msg(format!("string indices must be integers, not '{}'", index.type_name())),
        _ => ExcType::TypeError.msg(format!(
            "{} indices must be integers or slices, not {}",
            value.type_name(),
            index.type_name()
        )),
    }
}

fn get_item(object: &Value, index: Index) -> RunResult<Value> {
    if let Value::Dict(dict) = object {
        return match index {
            Index::Item(key) => {
                let found = dict.borrow().get(&key)?.cloned();
                found.ok_or_else(|| ExcType::key_error(key))
            }
            Index::Slice { .. } => Err(ExcType::TypeError.msg("unhashable type: 'slice'")),
        };
    }
    let len = match object {
        Value::List(list) => list.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::Range(r) => r.len(),
        other => return Err(ExcType::type_error_not_sub(other)),
    };
    match index {
        Index::Item(key) => {
            let i = key.as_index().ok_or_else(|| seq_index_type_error(object, &key))?;
            let at = normalize_index(i, len).ok_or_else(|| seq_index_error(object))?;
            Ok(match object {
                Value::List(list) => list.borrow()[at].clone(),
                Value::Tuple(items) => items[at].clone(),
                Value::Str(s) => s.chars().nth(at).map_or(Value::None, |c| Value::from(c.to_string())),
                Value::Bytes(b) => Value::Int(i64::from(b[at])),
                Value::Range(r) => r.get(at).map_or(Value::None, Value::Int),
                _ => Value::None,
            })
        }
        Index::Slice { lower, upper, step } => {
            let picks = slice_indices(len, lower, upper, step)?;
            Ok(match object {
                Value::List(list) => {
                    let items = list.borrow();
                    Value::from(picks.iter().map(|&i| items[i].clone()).collect::<Vec<_>>())
                }
                Value::Tuple(items) => Value::Tuple(picks.iter().map(|&i| items[i].clone()).collect()),
                Value::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    Value::from(picks.iter().map(|&i| chars[i]).collect::<String>())
                }
                Value::Bytes(b) => Value::Bytes(picks.iter().map(|&i| b[i]).collect()),
                Value::Range(r) => {
                    let step = r.step.saturating_mul(step.unwrap_or(1));
                    match picks.first().and_then(|&i| r.get(i)) {
                        Some(start) => {
                            let count = i64::try_from(picks.len()).unwrap_or(i64::MAX);
                            Value::Range(Range {
                                start,
                                stop: start.saturating_add(step.saturating_mul(count)),
                                step,
                            })
                        }
                        None => Value::Range(Range { start: 0, stop: 0, step: 1 }),
                    }
                }
                _ => Value::None,
            })
        }
    }
}

fn set_item(object: &Value, index: Index, value: Value) -> RunResult<()> {
    match (object, index) {
        (Value::Dict(dict), Index::Item(key)) => dict.borrow_mut().insert(key, value),
        (Value::List(list), Index::Item(key)) => {
            let i = key.as_index().ok_or_else(|| seq_index_type_error(object, &key))?;
            let len = list.borrow().len();
            let at = normalize_index(i, len)
                .ok_or_else(|| ExcType::IndexError.msg("list assignment index out of range"))?;
            list.borrow_mut()[at] = value;
            Ok(())
        }
        (Value::List(list), Index::Slice { lower, upper, step }) => {
            let items = collect(&value)?;
            let len = list.borrow().len();
            if step.unwrap_or(1) == 1 {
                let picks = slice_indices(len, lower, upper, None)?;
                let start = match (picks.first(), lower) {
                    (Some(&first), _) => first,
                    (None, lower) => slice_insert_point(len, lower),
                };
                let end = start + picks.len();
                list.borrow_mut().splice(start..end, items);
                return Ok(());
            }
            let picks = slice_indices(len, lower, upper, step)?;
            if picks.len() != items.len() {
                return Err(ExcType::ValueError.msg(format!(
                    "attempt to assign sequence of size {} to extended slice of size {}",
                    items.len(),
                    picks.len()
                )));
            }
            let mut target = list.borrow_mut();
            for (i, item) in picks.into_iter().zip(items) {
                target[i] = item;
            }
            Ok(())
        }
        (Value::Dict(_), Index::Slice { .. }) => Err(ExcType::TypeError.msg("unhashable type: 'slice'")),
        (other, _) => Err(ExcType::type_error_not_sub_assignment(other)),
    }
}

/// Where `lst[lower:...] = items` inserts when the slice selects nothing.
fn slice_insert_point(len: usize, lower: Option<i64>) -> usize {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let at = match lower {
        None => 0,
        Some(b) if b < 0 => (b + len_i).max(0),
        Some(b) => b.min(len_i),
    };
    usize::try_from(at).unwrap_or(len)
}

fn del_item(object: &Value, index: Index) -> RunResult<()> {
    match (object, index) {
        (Value::Dict(dict), Index::Item(key)) => {
            let removed = dict.borrow_mut().remove(&key)?;
            removed.map(|_| ()).ok_or_else(|| ExcType::key_error(key))
        }
        (Value::List(list), Index::Item(key)) => {
            let i = key.as_index().ok_or_else(|| seq_index_type_error(object, &key))?;
            let len = list.borrow().len();
            let at = normalize_index(i, len)
                .ok_or_else(|| ExcType::IndexError.msg("list assignment index out of range"))?;
            list.borrow_mut().remove(at);
            Ok(())
        }
        (Value::List(list), Index::Slice { lower, upper, step }) => {
            let len = list.borrow().len();
            let mut picks = slice_indices(len, lower, upper, step)?;
            picks.sort_unstable_by(|a, b| b.cmp(a));
            let mut items = list.borrow_mut();
            for i in picks {
                items.remove(i);
            }
            Ok(())
        }
        (other, _) => Err(ExcType::TypeError.msg(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn slices_follow_python_clamping() {
        assert_eq!(slice_indices(5, Some(1), Some(3), None).unwrap(), vec![1, 2]);
        assert_eq!(slice_indices(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, Some(10), Some(20), None).unwrap(), Vec::<usize>::new());
        assert!(slice_indices(5, None, None, Some(0)).is_err());
        assert_eq!(slice_indices(3, Some(1), None, Some(i64::MAX)).unwrap(), vec![1]);
        assert_eq!(slice_indices(3, None, None, Some(i64::MIN)).unwrap(), vec![2]);
    }
}
