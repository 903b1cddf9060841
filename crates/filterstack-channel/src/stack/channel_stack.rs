use std::sync::Arc;

use filterstack_core::error::{CallError, Result, StatusCode};
use filterstack_core::{CallCombiner, ExecCtx, OpBatch};

use crate::stack::channel_init::ChannelType;
use crate::stack::filter::{CallElement, CallElementArgs, ChannelElement, ChannelInfo, ChannelOp};

pub(crate) struct ChannelEntry {
    name: &'static str,
    element: Box<dyn ChannelElement>,
}

impl ChannelEntry {
    pub(crate) fn new(name: &'static str, element: Box<dyn ChannelElement>) -> Self {
        Self { name, element }
    }
}

/// Ordered channel elements, terminal last.
pub struct ChannelStack {
    channel_type: ChannelType,
    elements: Vec<ChannelEntry>,
}

impl ChannelStack {
    pub(crate) fn new(channel_type: ChannelType, elements: Vec<ChannelEntry>) -> Self {
        Self { channel_type, elements }
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.elements.iter().map(|e| e.name).collect()
    }

    /// One call element per channel element. Any failure drops the ones
    /// already created.
    pub fn create_call_stack(&self, args: &CallElementArgs<'_>) -> Result<CallStack> {
        let elements = self
            .elements
            .iter()
            .map(|e| e.element.init_call_elem(args))
            .collect::<Result<Vec<_>>>()?;
        Ok(CallStack {
            elements,
            combiner: Arc::clone(args.call_combiner),
        })
    }

    pub fn start_transport_op(&self, op: ChannelOp) {
        ChannelNext { entries: &self.elements }.start_transport_op(op);
    }

    pub fn get_info(&self) -> ChannelInfo {
        let mut info = ChannelInfo::default();
        ChannelNext { entries: &self.elements }.get_info(&mut info);
        info
    }
}

/// The rest of a channel stack, from an element's point of view.
pub struct ChannelNext<'a> {
    entries: &'a [ChannelEntry],
}

impl ChannelNext<'_> {
    pub fn start_transport_op(self, op: ChannelOp) {
        match self.entries.split_first() {
            Some((entry, rest)) => entry.element.start_transport_op(op, ChannelNext { entries: rest }),
            None => {
                tracing::debug!("transport op reached end of stack");
                if let Some(done) = op.on_consumed {
                    ExecCtx::run(done, None);
                }
            }
        }
    }

    pub fn get_info(self, info: &mut ChannelInfo) {
        if let Some((entry, rest)) = self.entries.split_first() {
            entry.element.get_info(info, ChannelNext { entries: rest });
        }
    }
}

/// Per-call elements, one per channel element.
pub struct CallStack {
    elements: Vec<Box<dyn CallElement>>,
    combiner: Arc<CallCombiner>,
}

impl CallStack {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn call_combiner(&self) -> &Arc<CallCombiner> {
        &self.combiner
    }

    /// Pass `batch` to the first element. Must be called holding the combiner.
    pub fn start_batch(&self, batch: OpBatch) {
        CallNext {
            elements: &self.elements,
            combiner: &self.combiner,
        }
        .start_batch(batch);
    }
}

/// The rest of a call stack, from an element's point of view.
pub struct CallNext<'a> {
    elements: &'a [Box<dyn CallElement>],
    combiner: &'a CallCombiner,
}

impl CallNext<'_> {
    pub fn start_batch(self, batch: OpBatch) {
        match self.elements.split_first() {
            Some((element, rest)) => element.start_batch(
                batch,
                CallNext {
                    elements: rest,
                    combiner: self.combiner,
                },
            ),
            None => {
                tracing::error!("op batch forwarded past the terminal element");
                batch.finish_with_failure(
                    CallError::with_code(StatusCode::Internal, "op batch forwarded past the terminal element"),
                    self.combiner,
                );
            }
        }
    }
}
