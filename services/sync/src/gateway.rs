use punchsync_common::punch::{DeliveryOutcome, LogicalEvent, TIMESTAMP_FORMAT};

use crate::downstream::client::DownstreamClient;
use crate::downstream::models::{CreateOutcome, EmployeeStatus};

/// Delivers one logical event downstream, gated on employee status and on
/// the record not already existing there.
pub struct DeliveryGateway<C> {
    client: C,
}

impl<C> DeliveryGateway<C>
where
    C: DownstreamClient,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub async fn deliver(&self, event: &LogicalEvent) -> DeliveryOutcome {
        let outcome = self.try_deliver(event).await;
        log_outcome(event, &outcome);
        outcome
    }

    async fn try_deliver(&self, event: &LogicalEvent) -> DeliveryOutcome {
        match self.client.get_employee_status(&event.employee_id).await {
            Ok(EmployeeStatus::Active) => {}
            Ok(status) => {
                tracing::debug!(
                    employee_id = %event.employee_id,
                    status = status.as_str(),
                    "employee not active, skipping punch"
                );
                return DeliveryOutcome::EmployeeNotActive;
            }
            Err(e) => {
                return DeliveryOutcome::TransientFailure(format!("employee status lookup: {e}"))
            }
        }

        match self
            .client
            .find_checkin(&event.employee_id, event.occurred_at)
            .await
        {
            Ok(true) => return DeliveryOutcome::AlreadyExists,
            Ok(false) => {}
            Err(e) => {
                return DeliveryOutcome::TransientFailure(format!("existence check: {e}"))
            }
        }

        match self.client.create_checkin(event).await {
            Ok(CreateOutcome::Created { name }) => {
                tracing::debug!(employee_id = %event.employee_id, record = %name, "checkin created");
                DeliveryOutcome::Delivered
            }
            Ok(CreateOutcome::Duplicate) => DeliveryOutcome::AlreadyExists,
            Ok(CreateOutcome::Rejected { reason }) => DeliveryOutcome::RejectedByDownstream(reason),
            Err(e) => DeliveryOutcome::TransientFailure(format!("create checkin: {e}")),
        }
    }
}

fn log_outcome(event: &LogicalEvent, outcome: &DeliveryOutcome) {
    let occurred_at = event.occurred_at.format(TIMESTAMP_FORMAT);
    match outcome {
        DeliveryOutcome::Delivered | DeliveryOutcome::AlreadyExists => tracing::info!(
            employee_id = %event.employee_id,
            %occurred_at,
            direction = %event.direction,
            outcome = outcome.as_str(),
            "punch synced"
        ),
        DeliveryOutcome::EmployeeNotActive => tracing::warn!(
            employee_id = %event.employee_id,
            %occurred_at,
            direction = %event.direction,
            "employee not active"
        ),
        DeliveryOutcome::TransientFailure(reason) => tracing::warn!(
            employee_id = %event.employee_id,
            %occurred_at,
            direction = %event.direction,
            reason = %reason,
            "punch delivery failed, will retry"
        ),
        DeliveryOutcome::RejectedByDownstream(reason) => tracing::error!(
            employee_id = %event.employee_id,
            %occurred_at,
            direction = %event.direction,
            reason = %reason,
            "punch rejected downstream"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, logical, MockDownstream};

    #[tokio::test]
    async fn active_employee_without_record_is_created() {
        let downstream = MockDownstream::default().with_active("T000007");
        let gateway = DeliveryGateway::new(downstream.clone());

        let outcome = gateway.deliver(&logical("T000007", at(10, 8, 5))).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(downstream.created().len(), 1);
    }

    #[tokio::test]
    async fn inactive_employee_never_reaches_create() {
        let downstream = MockDownstream::default()
            .with_status("T000009", EmployeeStatus::Inactive);
        let gateway = DeliveryGateway::new(downstream.clone());

        let outcome = gateway.deliver(&logical("T000009", at(10, 8, 5))).await;

        assert_eq!(outcome, DeliveryOutcome::EmployeeNotActive);
        assert_eq!(downstream.create_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_employee_is_not_active() {
        let downstream = MockDownstream::default();
        let gateway = DeliveryGateway::new(downstream.clone());

        let outcome = gateway.deliver(&logical("T000404", at(10, 8, 5))).await;

        assert_eq!(outcome, DeliveryOutcome::EmployeeNotActive);
        assert_eq!(downstream.create_calls(), 0);
    }

    #[tokio::test]
    async fn existing_record_is_not_created_again() {
        let downstream = MockDownstream::default()
            .with_active("T000007")
            .with_existing("T000007", at(10, 8, 5));
        let gateway = DeliveryGateway::new(downstream.clone());

        let outcome = gateway.deliver(&logical("T000007", at(10, 8, 5))).await;

        assert_eq!(outcome, DeliveryOutcome::AlreadyExists);
        assert_eq!(downstream.create_calls(), 0);
    }

    #[tokio::test]
    async fn status_lookup_failure_is_transient() {
        let downstream = MockDownstream::default().with_active("T000007");
        downstream.set_status_failing(true);
        let gateway = DeliveryGateway::new(downstream.clone());

        let outcome = gateway.deliver(&logical("T000007", at(10, 8, 5))).await;

        assert!(matches!(outcome, DeliveryOutcome::TransientFailure(_)));
        assert_eq!(downstream.create_calls(), 0);
    }

    #[tokio::test]
    async fn existence_check_failure_never_creates_blind() {
        let downstream = MockDownstream::default().with_active("T000007");
        downstream.set_find_failing(true);
        let gateway = DeliveryGateway::new(downstream.clone());

        let outcome = gateway.deliver(&logical("T000007", at(10, 8, 5))).await;

        assert!(matches!(outcome, DeliveryOutcome::TransientFailure(_)));
        assert_eq!(downstream.create_calls(), 0);
    }

    #[tokio::test]
    async fn create_results_map_to_outcomes() {
        let downstream = MockDownstream::default().with_active("T000007");
        let gateway = DeliveryGateway::new(downstream.clone());

        downstream.set_create_response(Some(CreateOutcome::Duplicate));
        assert_eq!(
            gateway.deliver(&logical("T000007", at(10, 8, 5))).await,
            DeliveryOutcome::AlreadyExists
        );

        downstream.set_create_response(Some(CreateOutcome::Rejected {
            reason: "HTTP 417: bad".into(),
        }));
        assert_eq!(
            gateway.deliver(&logical("T000007", at(10, 9, 5))).await,
            DeliveryOutcome::RejectedByDownstream("HTTP 417: bad".into())
        );

        downstream.set_create_failing(true);
        assert!(matches!(
            gateway.deliver(&logical("T000007", at(10, 10, 5))).await,
            DeliveryOutcome::TransientFailure(_)
        ));
    }
}
