//! Walks a segmentation step through a two-unit merge.
//!
//! Run with `RUST_LOG=segment_step=debug` to see the controller's tracing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use segment_step::driver::{drain_pending, run_until_settled};
use segment_step::runner::LocalJobRunner;
use segment_step::{
    signal, Color, LabelMap, MemoryScene, NodeRef, SegmentationUnit, SignalSender, StepController,
    StepSignal, TransitionKind, UnitIndex, UpstreamVolumes, ViewBinder, ViewBindings,
    WorkflowHost,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Painter {
    result: Option<NodeRef>,
    master: Option<NodeRef>,
    valid: bool,
    signals: Option<(UnitIndex, SignalSender)>,
}

/// A unit that is "painted" by the walkthrough.
#[derive(Debug, Clone, Default)]
struct DemoUnit(Arc<Mutex<Painter>>);

impl DemoUnit {
    fn new(result: NodeRef) -> Self {
        let unit = Self::default();
        if let Ok(mut painter) = unit.0.lock() {
            painter.result = Some(result);
        }
        unit
    }

    fn paint(&self) {
        let Ok(mut painter) = self.0.lock() else {
            return;
        };
        painter.valid = true;
        if let Some((index, tx)) = &painter.signals {
            let _ = tx.send(StepSignal::UnitValid(*index));
        }
    }
}

impl SegmentationUnit for DemoUnit {
    fn set_master_volume(&mut self, volume: Option<NodeRef>) {
        if let Ok(mut painter) = self.0.lock() {
            painter.master = volume;
        }
    }
    fn set_auxiliary_volume(&mut self, _index: usize, _volume: Option<NodeRef>) {}
    fn master_volume(&self) -> Option<NodeRef> {
        self.0.lock().ok()?.master.clone()
    }
    fn is_segmentation_valid(&self) -> bool {
        self.0.lock().map(|p| p.valid).unwrap_or(false)
    }
    fn result_label_map(&self) -> Option<NodeRef> {
        self.0.lock().ok()?.result.clone()
    }
    fn representative_color(&self) -> Color {
        Color::rgb(221, 130, 101)
    }
    fn set_visible(&mut self, _visible: bool) {}
    fn set_collapsed(&mut self, _collapsed: bool) {}
    fn reconcile_parameters_from_ui(&mut self) {}
    fn set_painting_enabled(&mut self, _enabled: bool) {}
    fn connect_validity(&mut self, index: UnitIndex, signals: SignalSender) {
        if let Ok(mut painter) = self.0.lock() {
            painter.signals = Some((index, signals));
        }
    }
}

#[derive(Debug)]
struct PrintingHost {
    upstream: UpstreamVolumes,
}

impl WorkflowHost for PrintingHost {
    fn report_validity(&mut self, valid: bool, _desired_branch: Option<&str>) {
        println!("  host: next button {}", if valid { "enabled" } else { "disabled" });
    }
    fn request_layout(&mut self, layout_id: u32) {
        println!("  host: layout {}", layout_id);
    }
    fn upstream_volumes(&self) -> UpstreamVolumes {
        self.upstream.clone()
    }
}

#[derive(Debug)]
struct PrintingViews;

impl ViewBinder for PrintingViews {
    fn set_view_bindings(&mut self, bindings: ViewBindings) {
        for (view, roles) in bindings {
            println!("  views: {} <- {:?}", view, roles);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("segment_step=info")),
        )
        .init();

    let scene = MemoryScene::new();
    let master = scene.add_volume("resampled")?;
    let liver = scene.add_label_map(
        "liver-label",
        LabelMap::new([4, 2, 1], vec![1, 1, 1, 0, 1, 1, 0, 0])?,
    )?;
    let tumor = scene.add_label_map(
        "liver-label-tumor",
        LabelMap::new([4, 2, 1], vec![0, 2, 0, 0, 0, 2, 2, 0])?,
    )?;

    let (tx, mut rx) = signal::channel();
    let primary = DemoUnit::new(liver);
    let secondary = DemoUnit::new(tumor);

    let mut step = StepController::builder()
        .primary(primary.clone())
        .secondary(secondary.clone())
        .host(PrintingHost {
            upstream: UpstreamVolumes {
                master: Some(master),
                auxiliary: Vec::new(),
            },
        })
        .runner(
            LocalJobRunner::new(scene.clone(), tx.clone())
                .with_work_delay(Duration::from_millis(100)),
        )
        .scene(scene.clone())
        .views(PrintingViews)
        .signals(tx)
        .build()?;

    println!("== entering {}", step.name());
    step.on_entry("RegisterStep", TransitionKind::Forward);

    println!("== painting the liver");
    primary.paint();
    drain_pending(&mut step, &mut rx);

    println!("== adding a tumor unit");
    step.add_unit();
    secondary.paint();
    drain_pending(&mut step, &mut rx);

    println!("== merging");
    step.start_merge()?;
    let status = run_until_settled(&mut step, &mut rx).await;
    println!("== merge {}", status);

    if let Some(output) = step.merge_result() {
        if let Some(merged) = scene.label_map(&output)? {
            println!("  merged voxels: {:?}", merged.voxels());
        }
    }

    println!();
    print!("{}", step.snapshot());
    Ok(())
}
