// src/compiler/dockerfile.rs

//! Dockerfiles for builder and step images

use super::spec::CompilationSpec;
use std::fmt::Write;

/// Working directory holding the build context inside images
pub const BUILD_DIR: &str = "/kilnbuild";

/// A resolved `COPY --from` instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFrom {
    pub image: String,
    pub source: String,
    pub destination: String,
}

fn env_lines(out: &mut String, spec: &CompilationSpec) {
    for var in &spec.build.env {
        let _ = writeln!(out, "ENV {}", var);
    }
}

/// Builder image: base, build context, environment, copies, prelude
pub fn render_builder(spec: &CompilationSpec, base: &str, copies: &[CopyFrom]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FROM {}", base);
    let _ = writeln!(out, "COPY . {}", BUILD_DIR);
    let _ = writeln!(out, "WORKDIR {}", BUILD_DIR);
    env_lines(&mut out, spec);
    for copy in copies {
        let _ = writeln!(
            out,
            "COPY --from={} {} {}",
            copy.image, copy.source, copy.destination
        );
    }
    for url in &spec.build.retrieve {
        let _ = writeln!(out, "ADD {} {}/", url, BUILD_DIR);
    }
    for step in &spec.build.prelude {
        let _ = writeln!(out, "RUN {}", step);
    }
    out
}

/// Step image: the builder plus the build steps
pub fn render_step(spec: &CompilationSpec, builder: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FROM {}", builder);
    let _ = writeln!(out, "WORKDIR {}", BUILD_DIR);
    env_lines(&mut out, spec);
    for step in &spec.build.steps {
        let _ = writeln!(out, "RUN {}", step);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Package;

    #[test]
    fn test_render_stages() {
        let spec = CompilationSpec::from_build_yaml(
            Package::new("app", "a", "1.0"),
            "prelude: [\"apk add make\"]\nsteps: [\"make install\"]\nenv: [\"CC=gcc\"]\nretrieve: [\"https://example.org/src.tgz\"]\n",
        )
        .unwrap();
        let copies = vec![CopyFrom {
            image: "alpine".to_string(),
            source: "/etc/os-release".to_string(),
            destination: "/tmp/".to_string(),
        }];

        let builder = render_builder(&spec, "alpine:3", &copies);
        assert!(builder.starts_with("FROM alpine:3\n"));
        assert!(builder.contains("ENV CC=gcc\n"));
        assert!(builder.contains("COPY --from=alpine /etc/os-release /tmp/\n"));
        assert!(builder.contains("ADD https://example.org/src.tgz /kilnbuild/\n"));
        assert!(builder.ends_with("RUN apk add make\n"));
        assert!(!builder.contains("make install"));

        let step = render_step(&spec, "kiln/cache:builder-abc");
        assert!(step.starts_with("FROM kiln/cache:builder-abc\n"));
        assert!(step.ends_with("RUN make install\n"));
    }
}
