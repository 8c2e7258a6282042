// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Step composition
//!
//! [`CompositeStep`] runs a list of steps in order and stops at the first result that is not a
//! plain success. [`ConditionalStep`] picks one of two composites with a predicate.
//!

use crate::{Error, MessagingContext, Step, StepResult};

use async_trait::async_trait;
use tracing::debug;

use std::sync::Arc;

/// Predicate evaluated against the incoming context.
pub type Condition = Arc<dyn Fn(&MessagingContext) -> bool + Send + Sync>;

/// Sequence of steps.
pub struct CompositeStep {
    steps: Vec<Box<dyn Step>>,
}

impl CompositeStep {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// Fails when no step collection is given.
    pub fn try_new(steps: Option<Vec<Box<dyn Step>>>) -> Result<Self, Error> {
        steps.map(Self::new).ok_or_else(|| {
            Error::Configuration("A composite step needs a step collection".to_owned())
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl Step for CompositeStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let mut result = StepResult::success(context);
        for (position, step) in self.steps.iter().enumerate() {
            result = step.execute(result.into_context()).await?;
            if !result.can_proceed()
                || !result.succeeded()
                || result.context().exception().is_some()
            {
                debug!(
                    "Pipeline stopped after step {} of {}.",
                    position + 1,
                    self.steps.len()
                );
                return Ok(result);
            }
        }
        Ok(result)
    }
}

/// Two-way branch over step lists.
///
/// Without a condition the else branch is always taken.
pub struct ConditionalStep {
    condition: Option<Condition>,
    then_steps: CompositeStep,
    else_steps: CompositeStep,
}

impl ConditionalStep {
    pub fn new(
        condition: Option<Condition>,
        then_steps: CompositeStep,
        else_steps: CompositeStep,
    ) -> Self {
        Self {
            condition,
            then_steps,
            else_steps,
        }
    }
}

#[async_trait]
impl Step for ConditionalStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let take_then = self
            .condition
            .as_ref()
            .map_or(false, |condition| condition(&context));
        if take_then {
            self.then_steps.execute(context).await
        } else {
            self.else_steps.execute(context).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessagingMode;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Outcome {
        Success,
        Failed,
        Stop,
        Exception,
        Error,
    }

    struct Scripted {
        outcome: Outcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Step for Scripted {
        async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Success => Ok(StepResult::success(context)),
                Outcome::Failed => Ok(StepResult::failed(context)),
                Outcome::Stop => Ok(StepResult::success(context).and_stop_execution()),
                Outcome::Exception => Ok(StepResult::success(
                    context.with_exception(Error::Functional("scripted".to_owned())),
                )),
                Outcome::Error => Err(Error::Step("scripted".to_owned())),
            }
        }
    }

    fn scripted(outcomes: &[Outcome]) -> (Vec<Box<dyn Step>>, Vec<Arc<AtomicUsize>>) {
        let counters: Vec<Arc<AtomicUsize>> =
            outcomes.iter().map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let steps = outcomes
            .iter()
            .zip(counters.iter())
            .map(|(outcome, calls)| {
                Box::new(Scripted {
                    outcome: *outcome,
                    calls: calls.clone(),
                }) as Box<dyn Step>
            })
            .collect();
        (steps, counters)
    }

    fn calls(counters: &[Arc<AtomicUsize>]) -> Vec<usize> {
        counters.iter().map(|c| c.load(Ordering::SeqCst)).collect()
    }

    fn context() -> MessagingContext {
        MessagingContext::as4(Default::default(), MessagingMode::Send)
    }

    #[tokio::test]
    async fn test_composite_runs_all_steps() {
        let (steps, counters) = scripted(&[Outcome::Success, Outcome::Success]);
        let result = CompositeStep::new(steps).execute(context()).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(calls(&counters), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_composite_stops_on_stop_execution() {
        let (steps, counters) =
            scripted(&[Outcome::Success, Outcome::Stop, Outcome::Success]);
        let result = CompositeStep::new(steps).execute(context()).await.unwrap();
        assert!(!result.can_proceed());
        assert!(result.succeeded());
        assert_eq!(calls(&counters), vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn test_composite_stops_on_failure_and_exception() {
        let (steps, counters) = scripted(&[Outcome::Failed, Outcome::Success]);
        let result = CompositeStep::new(steps).execute(context()).await.unwrap();
        assert!(!result.succeeded());
        assert_eq!(calls(&counters), vec![1, 0]);

        let (steps, counters) = scripted(&[Outcome::Exception, Outcome::Success]);
        let result = CompositeStep::new(steps).execute(context()).await.unwrap();
        assert!(result.context().exception().is_some());
        assert_eq!(calls(&counters), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_composite_propagates_errors() {
        let (steps, counters) = scripted(&[Outcome::Error, Outcome::Success]);
        let result = CompositeStep::new(steps).execute(context()).await;
        assert!(matches!(result, Err(Error::Step(_))));
        assert_eq!(calls(&counters), vec![1, 0]);
    }

    #[test]
    fn test_composite_without_steps_is_rejected() {
        assert!(matches!(
            CompositeStep::try_new(None),
            Err(Error::Configuration(_))
        ));
        assert!(CompositeStep::try_new(Some(Vec::new())).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conditional_branches() {
        let (then_steps, then_calls) = scripted(&[Outcome::Success]);
        let (else_steps, else_calls) = scripted(&[Outcome::Success]);
        let condition: Condition =
            Arc::new(|context: &MessagingContext| context.mode() == MessagingMode::Send);
        let step = ConditionalStep::new(
            Some(condition),
            CompositeStep::new(then_steps),
            CompositeStep::new(else_steps),
        );

        step.execute(context()).await.unwrap();
        assert_eq!(calls(&then_calls), vec![1]);
        assert_eq!(calls(&else_calls), vec![0]);

        step.execute(MessagingContext::as4(Default::default(), MessagingMode::Receive))
            .await
            .unwrap();
        assert_eq!(calls(&else_calls), vec![1]);
    }

    #[tokio::test]
    async fn test_conditional_without_condition_takes_else() {
        let (then_steps, then_calls) = scripted(&[Outcome::Success]);
        let (else_steps, else_calls) = scripted(&[Outcome::Failed]);
        let step = ConditionalStep::new(
            None,
            CompositeStep::new(then_steps),
            CompositeStep::new(else_steps),
        );
        let result = step.execute(context()).await.unwrap();
        assert!(!result.succeeded());
        assert_eq!(calls(&then_calls), vec![0]);
        assert_eq!(calls(&else_calls), vec![1]);
    }
}
