use crate::error::Result;
use crate::runtime::Runtime;
use crate::value::Value;

impl Runtime {
    /// A minimal evaluator for data built at runtime: symbols read their global
    /// value, `(quote x)` yields `x`, any other list is applied after evaluating
    /// every element, and everything else evaluates to itself.
    pub fn eval(&mut self, form: Value) -> Result<Value> {
        match form {
            Value::Symbol(symbol) => self.global_value(symbol),
            Value::Cons(_) => {
                if self.car(form)? == Value::Symbol(self.known.quote) {
                    let rest = self.cdr(form)?;
                    return self.car(rest);
                }
                let len = self
                    .list_length(form)
                    .ok_or_else(|| self.type_error("eval", "proper list", form))?;

                let mark = self.machine.mark();
                let result = self.eval_application(form, len);
                match result {
                    Ok(_) => self.machine.stack.truncate(mark.stack),
                    Err(_) => self.machine.restore(mark),
                }
                result
            }
            _ => Ok(form),
        }
    }

    fn eval_application(&mut self, form: Value, len: usize) -> Result<Value> {
        self.push(form)?;
        let mut cursor = form;
        for _ in 0..len {
            let item = self.car(cursor)?;
            let value = self.eval(item)?;
            self.push(value)?;
            cursor = self.cdr(cursor)?;
        }
        self.invoke(len - 1)
    }
}

#[cfg(test)]
mod tests {
    use crate::{ErrorKind, Runtime, Value};

    #[test]
    fn test_self_evaluating() {
        let mut rt = Runtime::default();
        assert_eq!(rt.eval(Value::Fixnum(7)).unwrap(), Value::Fixnum(7));
        assert_eq!(rt.eval(Value::NIL).unwrap(), Value::NIL);
    }

    #[test]
    fn test_quote_and_globals() {
        let mut rt = Runtime::default();
        let quote = rt.intern("quote");
        let x = rt.intern("x");
        let form = rt.list(&[quote, x]).unwrap();
        assert_eq!(rt.eval(form).unwrap(), x);

        let error = rt.eval(x).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnboundError);
    }

    #[test]
    fn test_application_calls_builtins() {
        let mut rt = Runtime::default();
        let length = rt.intern("length");
        let quote = rt.intern("quote");
        let items = rt.list(&[Value::Fixnum(1), Value::Fixnum(2)]).unwrap();
        rt.push(items).unwrap();
        let quoted = rt.list(&[quote, items]).unwrap();
        rt.push(quoted).unwrap();
        let form = rt.list(&[length, quoted]).unwrap();
        let depth = rt.stack_depth();

        assert_eq!(rt.eval(form).unwrap(), Value::Fixnum(2));
        assert_eq!(rt.stack_depth(), depth);
    }
}
