use provisio_domain::TemplateField;

use super::*;

impl PlanCompiler {
    /// Fills in account template fields the plan leaves unset.
    ///
    /// Creations use the create template. Update templates only apply with
    /// `autoExpandUpdateTemplates`. A required field without a value on a
    /// creation becomes a question.
    pub(super) async fn expand_templates(
        &self,
        project: &mut Project,
        context: &mut CompileContext,
    ) -> AppResult<()> {
        let no_create = project
            .options
            .is_enabled(CompilerOption::NoCreateTemplates);
        let expand_updates = project
            .options
            .is_enabled(CompilerOption::AutoExpandUpdateTemplates);

        let candidates: Vec<(PlanTarget, AbstractRequest)> = project
            .plans
            .iter()
            .map(|plan| {
                (
                    PlanTarget::Integration(plan.target_integration.clone().unwrap_or_default()),
                    plan,
                )
            })
            .chain(
                project
                    .unmanaged_plan
                    .iter()
                    .map(|plan| (PlanTarget::Unmanaged, plan)),
            )
            .flat_map(|(target, plan)| {
                plan.account_requests()
                    .map(move |request| (target.clone(), request.clone()))
            })
            .collect();

        for (target, request) in candidates {
            let usage = if request.is_create() {
                if no_create {
                    continue;
                }
                TemplateUsage::Create
            } else if expand_updates {
                TemplateUsage::Update
            } else {
                continue;
            };
            let Some(template) = self
                .application(context, request.application.as_str())
                .await?
                .and_then(|definition| definition.template(usage).cloned())
            else {
                continue;
            };

            let mut expanded = request.empty_copy();
            for field in &template.fields {
                if request.attribute(field.name.as_str()).is_some() {
                    continue;
                }
                let question = TemplateFieldQuestion::new(
                    request.application.as_str(),
                    request.instance.clone(),
                    field.name.as_str(),
                    field.prompt.clone(),
                );

                let answer = project
                    .find_question(question.id.as_str())
                    .and_then(Question::as_template_field)
                    .and_then(|answered| answered.answer.clone());
                let value = match answer {
                    Some(answer) => {
                        project.add_question(Question::TemplateField(question));
                        Some(answer)
                    }
                    None => {
                        let value = self.field_value(project, context, &request, field).await;
                        if value.is_none() && field.required && usage == TemplateUsage::Create {
                            debug!(
                                identity = %project.identity_name,
                                application = %request.application,
                                field = %field.name,
                                "template field needs an answer"
                            );
                            project.add_question(Question::TemplateField(question));
                        }
                        value
                    }
                };

                if let Some(value) = value {
                    expanded.attribute_requests.push(GenericRequest::new(
                        field.name.as_str(),
                        AttributeOperation::Set,
                        Some(value),
                    ));
                }
            }

            if expanded.has_no_children() {
                continue;
            }
            let matcher = self.matcher(context, request.application.as_str()).await?;
            record_expansion(
                project,
                &expanded,
                ExpansionCause::Template,
                request.application.as_str(),
            );
            assimilate_into(project, &target, &expanded, matcher);
        }
        Ok(())
    }

    /// Reads a field value from the identity, the default or the field script.
    async fn field_value(
        &self,
        project: &Project,
        context: &CompileContext,
        request: &AbstractRequest,
        field: &TemplateField,
    ) -> Option<Value> {
        if let Some(value) = field
            .identity_attribute
            .as_deref()
            .and_then(|name| context.identity.attribute(name))
            .filter(|value| !value.is_null())
        {
            return Some(value.clone());
        }
        if let Some(default) = field.default.clone() {
            return Some(default);
        }

        let script = field.script.as_deref()?;
        let mut arguments = Map::new();
        arguments.insert(
            "identity".to_owned(),
            Value::String(project.identity_name.clone()),
        );
        arguments.insert(
            "application".to_owned(),
            Value::String(request.application.clone()),
        );
        arguments.insert("field".to_owned(), Value::String(field.name.clone()));
        if let Some(native_identity) = request.native_identity.as_deref() {
            arguments.insert(
                "nativeIdentity".to_owned(),
                Value::String(native_identity.to_owned()),
            );
        }

        match self.run_script(script, arguments).await {
            Ok(value) if !value.is_null() => Some(value),
            Ok(_) => None,
            Err(error) => {
                warn!(
                    application = %request.application,
                    field = %field.name,
                    error = %error,
                    "template script failed"
                );
                None
            }
        }
    }
}
