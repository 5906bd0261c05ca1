//! Build pipeline tests against the system C++ compiler
//!
//! A fake translator stands in for the Faust compiler: it ignores the
//! architecture file and writes a small hand-written module implementing the
//! loader ABI to the `-o` path. Everything after translation is real: the
//! native compile, dlopen, symbol lookup, instantiation and cleanup.
//!
//! Tests return early when no `c++` is installed.

#![cfg(unix)]

use livedsp::cache::CacheDir;
use livedsp::client::{AudioClient, MockBackend};
use livedsp::compiler::{CompileRequest, Compiler};
use livedsp::controls;
use livedsp::error::{BuildError, BuildStage};
use livedsp::settings::{CompileSettings, Toolchain};
use livedsp::Dsp;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

const ABI_HEADER: &str = r#"
#include <cstdint>

extern "C" {

struct livedsp_controls {
    void *ctx;
    void (*open_box)(void *ctx, int32_t kind, const char *label);
    void (*close_box)(void *ctx);
    void (*add_button)(void *ctx, const char *label, float *zone);
    void (*add_check_button)(void *ctx, const char *label, float *zone);
    void (*add_slider)(void *ctx, int32_t orientation, const char *label, float *zone, float init, float min, float max, float step);
    void (*add_num_entry)(void *ctx, const char *label, float *zone, float init, float min, float max, float step);
    void (*add_bargraph)(void *ctx, int32_t orientation, const char *label, float *zone, float min, float max);
    void (*declare)(void *ctx, float *zone, const char *key, const char *value);
};

struct livedsp_module {
    uint32_t abi_version;
    void *instance;
    void (*destroy)(livedsp_module *module);
    int32_t (*num_inputs)(void *instance);
    int32_t (*num_outputs)(void *instance);
    void (*init)(void *instance, int32_t sample_rate);
    void (*compute)(void *instance, int32_t count, float **inputs, float **outputs);
    void (*build_controls)(void *instance, const livedsp_controls *controls);
};

}
"#;

/// One in, one out, output = input * gain
fn gain_module(abi_version: u32) -> String {
    format!(
        r#"{header}
namespace {{

struct Gain {{
    float gain = 0.5f;
    float level = 0.0f;
    int32_t rate = 0;
}};

Gain *as_gain(void *instance) {{ return static_cast<Gain *>(instance); }}

void destroy(livedsp_module *module)
{{
    delete as_gain(module->instance);
    delete module;
}}

int32_t num_inputs(void *) {{ return 1; }}
int32_t num_outputs(void *) {{ return 1; }}

void init(void *instance, int32_t rate)
{{
    as_gain(instance)->gain = 0.5f;
    as_gain(instance)->rate = rate;
}}

void compute(void *instance, int32_t count, float **inputs, float **outputs)
{{
    Gain *g = as_gain(instance);
    float peak = 0.0f;
    for (int32_t i = 0; i < count; ++i) {{
        float y = inputs[0][i] * g->gain;
        outputs[0][i] = y;
        peak = y > peak ? y : (-y > peak ? -y : peak);
    }}
    g->level = peak;
}}

void build_controls(void *instance, const livedsp_controls *c)
{{
    Gain *g = as_gain(instance);
    c->open_box(c->ctx, 2, "gain");
    c->declare(c->ctx, &g->gain, "unit", "lin");
    c->add_slider(c->ctx, 0, "gain", &g->gain, 0.5f, 0.0f, 1.0f, 0.01f);
    c->add_bargraph(c->ctx, 1, "level", &g->level, 0.0f, 1.0f);
    c->close_box(c->ctx);
}}

}}

extern "C" __attribute__((visibility("default")))
livedsp_module *livedsp_create_module()
{{
    livedsp_module *m = new livedsp_module;
    m->abi_version = {abi_version};
    m->instance = new Gain;
    m->destroy = &destroy;
    m->num_inputs = &num_inputs;
    m->num_outputs = &num_outputs;
    m->init = &init;
    m->compute = &compute;
    m->build_controls = &build_controls;
    return m;
}}
"#,
        header = ABI_HEADER,
        abi_version = abi_version
    )
}

fn have_cxx() -> bool {
    Command::new("c++")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

struct Fixture {
    dir: tempfile::TempDir,
    cache: Arc<CacheDir>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheDir::create_in(&dir.path().join("cache")).unwrap());
        Self { dir, cache }
    }

    /// Compiler whose translator emits `cpp`
    fn compiler(&self, cpp: &str) -> Compiler {
        let generated = self.dir.path().join("generated.cpp");
        std::fs::write(&generated, cpp).unwrap();

        let translator = self.dir.path().join("translate");
        let script = format!(
            r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
    case "$1" in
        -o) out="$2"; shift 2 ;;
        -a|-vs) shift 2 ;;
        *) shift ;;
    esac
done
cp '{}' "$out"
"#,
            generated.display()
        );
        std::fs::write(&translator, script).unwrap();
        std::fs::set_permissions(&translator, std::fs::Permissions::from_mode(0o755)).unwrap();

        let toolchain = Toolchain {
            faust: translator.to_string_lossy().into_owned(),
            ..Toolchain::default()
        };
        Compiler::new(Arc::clone(&self.cache), toolchain)
    }

    fn request(&self) -> CompileRequest {
        let source = self.dir.path().join("gain.dsp");
        std::fs::write(&source, "process = _ * hslider(\"gain\", 0.5, 0, 1, 0.01);").unwrap();
        CompileRequest::new(source, CompileSettings::default())
    }

    fn artifacts(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.cache.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy().into_owned();
                name.starts_with("module.") && name != "module.cpp"
            })
            .collect()
    }
}

#[test]
fn test_build_load_and_play() {
    if !have_cxx() {
        eprintln!("skipping: no c++ compiler");
        return;
    }
    let fixture = Fixture::new();
    let compiler = fixture.compiler(&gain_module(1));

    let mut module = compiler.build(&fixture.request()).unwrap();
    let artifact = module.artifact().to_path_buf();
    assert!(artifact.exists());
    assert_eq!(module.num_inputs(), 1);
    assert_eq!(module.num_outputs(), 1);

    {
        let params = controls::collect(&mut module);
        assert_eq!(params.inputs.len(), 1);
        assert_eq!(params.inputs[0].label, "gain");
        assert_eq!(params.inputs[0].init, 0.5);
        assert_eq!(params.inputs[0].min, 0.0);
        assert_eq!(params.inputs[0].max, 1.0);
        assert_eq!(params.outputs.len(), 1);
        assert_eq!(params.outputs[0].label, "level");
        assert_eq!(params.outputs[0].init, 0.0);
    }

    let mut client = AudioClient::new(MockBackend::new("livedsp", 44100)).unwrap();
    client.activate(Some(Box::new(module))).unwrap();
    assert_eq!(client.backend().port_names(), vec!["in_1", "out_1"]);

    let silence = vec![0.0f32; 128];
    let out = client.backend_mut().run_cycle(128, &[&silence]).unwrap();
    assert_eq!(out[0], silence);

    let ones = vec![1.0f32; 128];
    let out = client.backend_mut().run_cycle(128, &[&ones]).unwrap();
    assert_eq!(out[0], vec![0.5; 128]);
    assert_eq!(client.parameters().outputs[0].value(), 0.5);

    assert_eq!(client.set_controls(&[3.0]), 1);
    assert_eq!(client.control_values(), vec![1.0]);
    let out = client.backend_mut().run_cycle(128, &[&ones]).unwrap();
    assert_eq!(out[0], ones);

    // Unloading deletes the artifact
    let previous = client.activate(None).unwrap();
    assert!(artifact.exists());
    drop(previous);
    assert!(!artifact.exists());
}

#[test]
fn test_compile_result_through_compile() {
    if !have_cxx() {
        return;
    }
    let fixture = Fixture::new();
    let compiler = fixture.compiler(&gain_module(1));
    let settings = CompileSettings {
        cxx_optimization: 3,
        cxx_fast_math: true,
        ..Default::default()
    };
    let request = CompileRequest {
        settings,
        ..fixture.request()
    };

    let result = compiler.compile(&request);
    assert!(result.is_success());
    drop(result);
    assert!(fixture.artifacts().is_empty());
}

#[test]
fn test_native_compile_failure() {
    if !have_cxx() {
        return;
    }
    let fixture = Fixture::new();
    let compiler = fixture.compiler("this is not C++ at all");

    let err = compiler.build(&fixture.request()).err().unwrap();
    assert_eq!(err.stage(), BuildStage::CompileNative);
    assert!(matches!(err, BuildError::Process { .. }));
    assert!(fixture.artifacts().is_empty());
}

#[test]
fn test_missing_entry_symbol() {
    if !have_cxx() {
        return;
    }
    let fixture = Fixture::new();
    let compiler = fixture.compiler("extern \"C\" int unrelated() { return 1; }\n");

    let err = compiler.build(&fixture.request()).err().unwrap();
    assert_eq!(err.stage(), BuildStage::Symbol);
    assert!(fixture.artifacts().is_empty());
}

#[test]
fn test_abi_version_mismatch() {
    if !have_cxx() {
        return;
    }
    let fixture = Fixture::new();
    let compiler = fixture.compiler(&gain_module(99));

    let err = compiler.build(&fixture.request()).err().unwrap();
    assert_eq!(err.stage(), BuildStage::Instantiate);
    assert!(fixture.artifacts().is_empty());
}

#[test]
fn test_translator_without_output() {
    let fixture = Fixture::new();
    let translator = fixture.dir.path().join("silent");
    std::fs::write(&translator, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&translator, std::fs::Permissions::from_mode(0o755)).unwrap();
    let compiler = Compiler::new(
        Arc::clone(&fixture.cache),
        Toolchain {
            faust: translator.to_string_lossy().into_owned(),
            ..Toolchain::default()
        },
    );

    let err = compiler.build(&fixture.request()).err().unwrap();
    assert!(matches!(
        err,
        BuildError::MissingOutput {
            stage: BuildStage::Translate,
            ..
        }
    ));
    assert!(fixture.artifacts().is_empty());
}

#[test]
fn test_rebuilds_use_fresh_artifacts() {
    if !have_cxx() {
        return;
    }
    let fixture = Fixture::new();
    let compiler = fixture.compiler(&gain_module(1));
    let request = fixture.request();

    let a = compiler.build(&request).unwrap();
    let b = compiler.build(&request).unwrap();
    assert_ne!(a.artifact(), b.artifact());
    assert_eq!(fixture.artifacts().len(), 2);

    drop(a);
    assert_eq!(fixture.artifacts().len(), 1);
    drop(b);
    assert!(fixture.artifacts().is_empty());
}
