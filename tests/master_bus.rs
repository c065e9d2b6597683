use studio_dsp::engine::master::{CompressorSettings, LimiterSettings, MasterBus};
use studio_dsp::graph::{AudioContext, ConstantSourceNode, StereoBuffer};
use studio_dsp::EngineConfig;

/// Master gain at construction.
const MASTER_GAIN: f32 = 0.9;

/// Master bus fed a constant `level`, rendered for one second.
fn render_constant(level: f32, configure: impl FnOnce(&MasterBus)) -> StereoBuffer {
    let config = EngineConfig::default();
    let context = AudioContext::new(&config);
    let master = MasterBus::new(context.clone(), &config).unwrap();
    configure(&master);

    let mut source = ConstantSourceNode::new(level);
    source.start(0.0);
    let source = context.graph().add(source);
    master.connect_external_input(source).unwrap();

    let out = context.graph().render_offline(48_000);
    out
}

/// A constant 2.0 (about +6 dBFS).
fn hot_signal(configure: impl FnOnce(&MasterBus)) -> StereoBuffer {
    render_constant(2.0, configure)
}

fn settled_peak(out: &StereoBuffer) -> f32 {
    out.left[40_000..].iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

#[test]
fn disabled_dynamics_pass_signal_at_master_gain() {
    let out = hot_signal(|master| {
        master.configure_compressor(CompressorSettings {
            enabled: false,
            ..Default::default()
        });
        master.configure_limiter(LimiterSettings {
            enabled: false,
            ..Default::default()
        });
    });
    let peak = settled_peak(&out);
    // Master gain 0.9, nothing else in the path
    assert!((peak - 1.8).abs() < 0.02, "bypassed chain should pass 1.8, got {peak}");
}

#[test]
fn engaged_limiter_holds_the_signal_down() {
    let out = hot_signal(|_| {});
    let peak = settled_peak(&out);
    assert!(peak < 1.2, "limiter and compressor engaged, got {peak}");
    assert!(peak > 0.1, "limiting must not mute, got {peak}");
}

#[test]
fn only_the_limiter_disabled_still_compresses() {
    let out = hot_signal(|master| {
        master.configure_limiter(LimiterSettings {
            enabled: false,
            ..Default::default()
        });
    });
    let peak = settled_peak(&out);
    assert!(peak < 1.8 - 0.1, "compressor still engaged, got {peak}");
}

#[test]
fn disabled_limiter_passes_quiet_signal_at_master_gain() {
    // 0.015 * 0.9 is about -37 dBFS: under the default compressor's knee,
    // so only the limiter could change the level
    let input = 0.015;
    let out = render_constant(input, |master| {
        master.configure_limiter(LimiterSettings {
            enabled: false,
            ..Default::default()
        });
    });
    let peak = settled_peak(&out);
    let expected = input * MASTER_GAIN;
    assert!(
        (peak - expected).abs() < expected * 0.02,
        "expected {expected} through the engaged compressor, got {peak}"
    );
}
