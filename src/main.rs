use spfs::storage::FsRepository;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let repo = FsRepository::open("./store")?;

    let src = tempfile::tempdir()?;
    std::fs::write(src.path().join("foo.txt"), b"foobarbaz")?;
    std::fs::create_dir(src.path().join("src"))?;
    std::fs::write(src.path().join("src/main.rs"), b"fn main() {}")?;
    std::os::unix::fs::symlink("./src/main.rs", src.path().join("baz.rs"))?;

    let package = repo.commit_dir(src.path())?;
    let digest = package.digest()?;
    println!("committed package: {}", digest.to_base32());

    repo.set_tag("latest", digest)?;
    println!("tagged 'latest' -> {}", repo.read_tag("latest")?.target);

    let manifest = package.read_manifest()?;
    let rendered = repo.render_manifest(&manifest)?;
    println!("rendered at: {}", rendered.display());

    repo.check_package(digest)?;
    println!("package verified OK");

    Ok(())
}
