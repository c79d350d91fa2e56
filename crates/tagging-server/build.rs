use vergen_gitcl::{BuildBuilder, CargoBuilder, Emitter, GitclBuilder, RustcBuilder};

/// Git variables supplied by CI or a container build when there is no checkout.
const GIT_FALLBACKS: [(&str, &str); 4] = [
    ("VERGEN_GIT_SHA", "unknown"),
    ("VERGEN_GIT_BRANCH", "unknown"),
    ("VERGEN_GIT_COMMIT_TIMESTAMP", "unknown"),
    ("VERGEN_GIT_DIRTY", "false"),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut emitter = Emitter::default();
    emitter
        .add_instructions(&BuildBuilder::all_build()?)?
        .add_instructions(&CargoBuilder::all_cargo()?)?
        .add_instructions(&RustcBuilder::all_rustc()?)?;

    match GitclBuilder::all_git() {
        Ok(git) => {
            emitter.add_instructions(&git)?;
        }
        Err(_) => {
            for (name, default) in GIT_FALLBACKS {
                let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
                println!("cargo::rustc-env={name}={value}");
            }
        }
    }

    emitter.emit()?;
    Ok(())
}
