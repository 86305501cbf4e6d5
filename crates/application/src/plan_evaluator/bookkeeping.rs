use super::*;

impl PlanEvaluator {
    /// Audits one result event per account request and one provenance event
    /// per expansion item whose request reached its backend.
    pub(super) async fn audit_results(&self, project: &Project) {
        let identity_name = project.identity_name.as_str();
        let mut events = Vec::new();

        for plan in project.plans.iter().chain(project.unmanaged_plan.iter()) {
            for request in &plan.requests {
                let Some(result) = plan.effective_result(request, None) else {
                    continue;
                };
                let kind = match result.status {
                    ProvisioningStatus::Committed | ProvisioningStatus::Queued => {
                        ProvisioningAuditKind::ProvisioningCommitted
                    }
                    ProvisioningStatus::Retry => ProvisioningAuditKind::ProvisioningRetried,
                    ProvisioningStatus::Failed => ProvisioningAuditKind::ProvisioningFailed,
                };
                let mut detail = result.status.as_str().to_owned();
                if !result.errors.is_empty() {
                    detail = format!("{detail}: {}", result.errors.join("; "));
                }
                events.push(
                    ProvisioningAuditEvent::new(kind, identity_name)
                        .on_account(
                            request.application.as_str(),
                            request.native_identity.as_deref(),
                        )
                        .with_detail(detail),
                );
            }
        }

        for item in &project.expansion_items {
            let applied = project
                .plans
                .iter()
                .chain(project.unmanaged_plan.iter())
                .any(|plan| {
                    plan.requests.iter().any(|request| {
                        item.belongs_to(request)
                            && plan
                                .effective_result(request, None)
                                .is_some_and(|result| result.status.is_submitted())
                    })
                });
            if !applied {
                continue;
            }
            events.push(
                ProvisioningAuditEvent::new(ProvisioningAuditKind::ExpansionApplied, identity_name)
                    .on_account(item.application.as_str(), item.native_identity.as_deref())
                    .with_attribute(item.name.as_str(), item.value.clone())
                    .with_detail(format!("{}: {}", item.cause.as_str(), item.source_info)),
            );
        }

        for event in events {
            let kind = event.kind;
            if let Err(error) = self.audit_sink.append_event(event).await {
                warn!(event = kind.as_str(), error = %error, "failed to append audit event");
            }
        }
    }

    /// Records work that backends accepted but have not confirmed yet.
    pub(super) async fn record_pending(&self, project: &Project, context: &ExecutionContext) {
        let Some(repository) = self.pending_requests.as_ref() else {
            return;
        };
        if context.options.skips_backends() {
            return;
        }

        for plan in &project.plans {
            let status = plan_status(plan);
            if status.is_none() {
                continue;
            }
            // A failed plan may still carry retried work; only that part is pending.
            let pending_plan = if PendingRequest::counts_as_pending(status) {
                plan.clone()
            } else if needs_retry(plan) {
                match retry::build_retry_plan(plan) {
                    Some(retry_plan) => retry_plan,
                    None => continue,
                }
            } else {
                continue;
            };
            let expiration = retry::requested_retry_at(plan)
                .unwrap_or(context.now + self.settings.pending_lifetime);
            let record = PendingRequest::new(
                project.identity_name.as_str(),
                plan.target_integration.clone().unwrap_or_default(),
                pending_plan,
                expiration,
            );
            if let Err(error) = repository.save_pending_request(record).await {
                warn!(
                    identity = %project.identity_name,
                    error = %error,
                    "failed to record pending request"
                );
            }
        }
    }

    /// Password hashes for accounts whose password change was committed.
    pub(super) fn link_password_changes(&self, project: &Project) -> Vec<LinkPasswordChange> {
        let Some(hasher) = self.password_hasher.as_ref() else {
            return Vec::new();
        };

        let mut changes = Vec::new();
        for plan in &project.plans {
            for request in &plan.requests {
                let Some(native_identity) = request.native_identity.as_deref() else {
                    continue;
                };
                for generic in &request.attribute_requests {
                    if generic.name != PASSWORD
                        || !matches!(
                            generic.operation,
                            AttributeOperation::Set | AttributeOperation::Add
                        )
                    {
                        continue;
                    }
                    let committed = plan
                        .effective_result(request, Some(generic))
                        .is_some_and(|result| result.status == ProvisioningStatus::Committed);
                    let Some(value) = generic.value.as_ref().and_then(value_as_text) else {
                        continue;
                    };
                    if !committed || value.is_empty() {
                        continue;
                    }

                    let hashed = self
                        .plaintext_password(generic.flag(arguments::SECRET), value)
                        .and_then(|plaintext| hasher.hash_password(plaintext.as_str()));
                    match hashed {
                        Ok(password_hash) => changes.push(LinkPasswordChange {
                            application: request.application.clone(),
                            instance: request.instance.clone(),
                            native_identity: native_identity.to_owned(),
                            password_hash,
                        }),
                        Err(error) => warn!(
                            application = %request.application,
                            native_identity,
                            error = %error,
                            "could not hash account password"
                        ),
                    }
                }
            }
        }
        changes
    }

    fn plaintext_password(&self, secret: bool, value: String) -> AppResult<String> {
        if !secret {
            return Ok(value);
        }
        let cipher = self
            .secret_cipher
            .as_ref()
            .ok_or_else(|| AppError::Dependency("no secret cipher configured".to_owned()))?;
        cipher.decrypt(value.as_str())
    }
}
