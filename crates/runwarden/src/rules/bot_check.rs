//! `if:` conditions that trust an actor because it looks like a bot.
//!
//! `github.actor` is whoever triggered the latest event, not the author of
//! the change being built, so a check like
//! `github.actor == 'dependabot[bot]'` can be satisfied by anyone who gets a
//! bot to act on their pull request.

use actions_expressions::{BinOp, Expr, Literal, SpannedExpr, fragments};
use actions_syntax::{Job, Scalar, Step};

use super::{OnJobEnter, OnStep, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta};

const ACTOR_CONTEXTS: &[&str] = &["github.actor", "github.triggering_actor"];

const STRING_MATCHERS: &[&str] = &["contains", "startsWith", "endsWith"];

pub(crate) struct BotCheck;

rule_meta!(
    BotCheck,
    "bot-check",
    "Checks for if statements that are based on a bot identity"
);

impl Rule for BotCheck {
    fn new(_: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self)
    }

    hooks!(OnJobEnter, OnStep);
}

impl OnJobEnter for BotCheck {
    fn on_job_enter(&mut self, job: &Job, sink: &mut Sink) {
        if let Some(cond) = &job.if_cond {
            check_condition(cond, sink);
        }
    }
}

impl OnStep for BotCheck {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        if let Some(cond) = &step.if_cond {
            check_condition(cond, sink);
        }
    }
}

fn check_condition(cond: &Scalar, sink: &mut Sink) {
    let text = cond.as_str();

    // `if:` takes either a bare expression or one wrapped in `${{ ... }}`.
    let parsed = if cond.has_expression() {
        fragments(text)
            .filter_map(|fragment| fragment.expr.ok().map(|expr| (fragment.body, expr)))
            .collect::<Vec<_>>()
    } else {
        match Expr::parse(text) {
            Ok(expr) => vec![(0, expr)],
            Err(err) => {
                tracing::debug!("skipping unparsable condition `{text}`: {err}");
                vec![]
            }
        }
    };

    for (base, expr) in parsed {
        let mut hits = vec![];
        find_bot_checks(&expr, &mut hits);

        for offset in hits {
            sink.report(
                cond.position_at(base + offset),
                "If statement based on the github.actor variable and a bot identity.",
            );
        }
    }
}

/// Collects the offsets of every comparison between an actor and a bot
/// login, in source order.
fn find_bot_checks(expr: &SpannedExpr<'_>, hits: &mut Vec<usize>) {
    let matched = match &expr.inner {
        Expr::BinOp {
            lhs,
            op: BinOp::Eq | BinOp::Neq,
            rhs,
        } => (is_actor(lhs) && is_bot_login(rhs)) || (is_bot_login(lhs) && is_actor(rhs)),
        Expr::FuncCall { func, args }
            if STRING_MATCHERS.iter().any(|name| func == *name) =>
        {
            args.iter().any(is_actor) && args.iter().any(is_bot_login)
        }
        _ => false,
    };

    if matched {
        hits.push(expr.origin.offset);
    }

    for child in expr.children() {
        find_bot_checks(child, hits);
    }
}

fn is_actor(expr: &SpannedExpr<'_>) -> bool {
    expr.context_path().is_some_and(|path| {
        ACTOR_CONTEXTS
            .iter()
            .any(|actor| actor.eq_ignore_ascii_case(&path))
    })
}

fn is_bot_login(expr: &SpannedExpr<'_>) -> bool {
    matches!(&expr.inner, Expr::Literal(Literal::String(s)) if s.ends_with("[bot]"))
}
