use cucumber::World;
use cucumber_tests::features::world::StrataWorld;

#[tokio::main]
async fn main() {
    // Scénarios du moteur de migrations (registre, runner, journal)
    StrataWorld::cucumber().run_and_exit("features/migrations/").await;
}
