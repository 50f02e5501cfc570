fn main() -> anyhow::Result<()> {
    whipctl_lib::run()
}
