use anyhow::Context;
use maclabel_core::{
    label::Label,
    store::{DynLabelStore, SubjectContext},
};
use tracing::{info, warn};

/// Applies the initial label of this process, then clears the effective set.
///
/// Later relabels raise their capability through the gate again. Kernel
/// capabilities are per thread, so this must run before the process starts any
/// other thread: build the async runtime after it returns.
pub fn bootstrap(store: &DynLabelStore, label: Option<&Label>) -> anyhow::Result<SubjectContext> {
    let context = SubjectContext::current();
    if let Some(label) = label {
        store
            .set_subject_label(&context, label)
            .with_context(|| format!("setting the label of {context} to {label}"))?;
    }
    store.gate().relinquish().context("clearing the effective capability set")?;

    match store.get_subject_label(&context) {
        Ok(current) => info!(%context, label = %current, "process label"),
        Err(e) => warn!(%context, "process label unavailable: {e}"),
    }
    Ok(context)
}
