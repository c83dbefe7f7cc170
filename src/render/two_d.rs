use super::{script_context, FrameContext, ModuleRenderer};
use crate::canvas::CanvasHandle;

/// The single registered renderer. Owns an off-screen surface the module
/// draws onto; the finished buffer is composited back onto the primary
/// canvas using the module's declared alpha and blend mode.
pub struct TwoDRenderer {
    buffer: CanvasHandle,
}

impl TwoDRenderer {
    pub fn new() -> Self {
        Self {
            buffer: CanvasHandle::new(0, 0),
        }
    }

    pub fn buffer_size(&self) -> (usize, usize) {
        self.buffer.size()
    }
}

impl Default for TwoDRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRenderer for TwoDRenderer {
    fn name(&self) -> &'static str {
        "2d"
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> anyhow::Result<()> {
        let (w, h) = ctx.canvas.size();

        // The primary canvas can be resized by the environment at any time;
        // track it every call, and start from a blank buffer before pulling
        // in the primary's current contents.
        self.buffer.resize(w, h);
        self.buffer.clear();
        self.buffer.draw_from(ctx.canvas, 0.0, 0.0, w as f32, h as f32);

        // Module code only ever sees the off-screen surface, bracketed by
        // save/restore so no draw state survives into the compositing step
        // or the next frame, even when draw fails.
        self.buffer.save();
        let script_ctx = script_context(&self.buffer, ctx.features, ctx.time, ctx.dt, ctx.module);
        let drawn = ctx.scripts.call_draw(ctx.module, script_ctx);
        self.buffer.restore();
        drawn?;

        let alpha = ctx.module.meta.alpha_or_default();
        let composite = ctx.module.meta.composite_or_default();

        ctx.canvas.save();
        ctx.canvas.set_global_alpha(alpha);
        ctx.canvas.set_composite(composite);
        ctx.canvas
            .draw_from(&self.buffer, 0.0, 0.0, w as f32, h as f32);
        ctx.canvas.restore();

        Ok(())
    }
}
