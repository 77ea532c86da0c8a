//! Pipeline execution.

use std::panic::{self, AssertUnwindSafe};

use super::{Flow, Step};
use crate::core::{Context, HandlerError, Response};
use crate::router::Route;

/// Continuation handed to a decorator.
pub struct Next<'a> {
    route: &'a Route,
    index: usize,
}

impl<'a> Next<'a> {
    fn new(route: &'a Route) -> Self {
        Self { route, index: 0 }
    }

    /// Run the rest of the pipeline: inner decorators, befores, the
    /// handler and afters.
    pub fn run(self, ctx: &mut Context) -> Result<Response, HandlerError> {
        let steps = self.route.steps();
        let remaining = steps.get(self.index..).unwrap_or_default();

        for (offset, step) in remaining.iter().enumerate() {
            if let Step::Decorator(decorator) = step {
                let next = Next {
                    route: self.route,
                    index: self.index + offset + 1,
                };
                return decorator(ctx, next);
            }
        }

        run_core(self.route, ctx)
    }
}

/// Befores, handler, afters.
fn run_core(route: &Route, ctx: &mut Context) -> Result<Response, HandlerError> {
    for step in route.steps() {
        if let Step::Before(before) = step {
            if let Flow::Stop(response) = before(ctx)? {
                return Ok(response);
            }
        }
    }

    let mut response = (route.handler())(ctx)?;

    for step in route.steps() {
        if let Step::After(after) = step {
            response = after(ctx, response)?;
        }
    }
    Ok(response)
}

/// Run the whole pipeline of `route`.
///
/// Panics inside any step are caught here and returned as errors.
pub fn execute(route: &Route, ctx: &mut Context) -> Result<Response, HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| Next::new(route).run(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::panic(payload)),
    }
}
