use super::*;
use crate::result::worst_status;

impl Project {
    /// Returns the compiled plans restricted to one request item.
    ///
    /// An account request carrying the tracking id is kept whole; otherwise
    /// only its generic requests carrying the id are kept. Plans left empty
    /// are omitted.
    #[must_use]
    pub fn itemize(&self, tracking_id: &str) -> Vec<Plan> {
        self.all_plans()
            .filter(|plan| plan.has_tracking_id(tracking_id))
            .filter_map(|plan| {
                let whole_plan = plan.tracking_ids.contains(tracking_id);
                let mut item_plan = plan.clone();
                item_plan.requests = plan
                    .requests
                    .iter()
                    .filter_map(|request| {
                        if whole_plan || request.tracking_ids.contains(tracking_id) {
                            return Some(request.clone());
                        }
                        let mut sliced = request.clone();
                        sliced
                            .attribute_requests
                            .retain(|generic| generic.tracking_ids.contains(tracking_id));
                        sliced
                            .permission_requests
                            .retain(|generic| generic.tracking_ids.contains(tracking_id));
                        (!sliced.has_no_children()).then_some(sliced)
                    })
                    .collect();
                (!item_plan.requests.is_empty()).then_some(item_plan)
            })
            .collect()
    }

    /// Summarises the outcome of one request item after execution.
    ///
    /// Returns the most severe status of the item's requests, or `None`
    /// when nothing carrying the id has a result yet.
    #[must_use]
    pub fn item_status(&self, tracking_id: &str) -> Option<ProvisioningStatus> {
        let plans = self.itemize(tracking_id);
        let statuses = plans.iter().flat_map(|plan| {
            plan.requests.iter().flat_map(move |request| {
                let own = plan
                    .effective_result(request, None)
                    .map(|result| result.status);
                let children = request.all_generic_requests().filter_map(move |(_, generic)| {
                    plan.effective_result(request, Some(generic))
                        .map(|result| result.status)
                });
                own.into_iter().chain(children)
            })
        });
        worst_status(statuses)
    }
}
