mod local_network_integration;
